pub mod io_utils;
