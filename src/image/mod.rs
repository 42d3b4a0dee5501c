pub mod simple_fits;
