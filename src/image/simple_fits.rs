use std::{io::*, str::FromStr};

pub trait SeekNRead: Seek + Read {}
impl<T: Seek + Read> SeekNRead for T {}

#[cfg(test)]
pub trait SeekNWrite: Seek + Write {}
#[cfg(test)]
impl<T: Seek + Write> SeekNWrite for T {}

const BLOCK_LEN: usize = 2880;

#[derive(Clone)]
struct Value {
    name:  String,
    value: String,
}

#[derive(Clone)]
pub struct Header {
    values:    Vec<Value>,
    dims:      Vec<usize>,
    data_pos:  usize,
    bytes_len: usize,
}

impl Header {
    fn get_value_impl<T: FromStr>(values: &Vec<Value>, key: &str) -> Option<T> {
        values.iter()
            .find(|item| item.name.eq_ignore_ascii_case(key))?
            .value.parse()
            .ok()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        Self::get_value_impl(&self.values, key)
    }

    /// Also accepts FORTRAN style `1.0D+02` exponents
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let item = self.values.iter()
            .find(|item| item.name.eq_ignore_ascii_case(key))?;
        item.value.replace(['D', 'd'], "E").parse().ok()
    }

    pub fn get_str<'b>(&'b self, key: &str) -> Option<&'b str> {
        let mut result = self.values.iter()
            .find(|item| item.name.eq_ignore_ascii_case(key))?
            .value.as_str();
        if result.starts_with("'") && result.ends_with("'") && result.len() >= 2 {
            result = &result[1..result.len()-1];
        }
        Some(result.trim())
    }

    pub fn is_bintable(&self) -> bool {
        self.get_str("XTENSION") == Some("BINTABLE")
    }

    /// Columns of BINTABLE extension described by `TTYPEn` and `TFORMn`
    pub fn table_columns(&self) -> Result<Vec<TableColumn>> {
        let fields = self.get_i64("TFIELDS").unwrap_or(0) as usize;
        let mut result = Vec::with_capacity(fields);
        let mut offset = 0;
        for idx in 1..=fields {
            let name = self.get_str(&format!("TTYPE{}", idx)).unwrap_or("").to_string();
            let form = self.get_str(&format!("TFORM{}", idx)).unwrap_or("");
            let type_ = ColumnType::from_tform(form).ok_or_else(|| Error::new(
                ErrorKind::Unsupported,
                format!("TFORM{} = {} is not supported", idx, form)
            ))?;
            let repeat = form
                .trim_end_matches(char::is_alphabetic)
                .parse::<usize>()
                .unwrap_or(1);
            result.push(TableColumn { name, type_, offset });
            offset += repeat * type_.len();
        }
        Ok(result)
    }
}

/// Writing side. Only test fixtures produce FITS files.
#[cfg(test)]
impl Header {
    pub fn new() -> Self {
        Self {
            values:    Vec::new(),
            dims:      Vec::new(),
            data_pos:  0,
            bytes_len: 0,
        }
    }

    pub fn dims(&self) -> &Vec<usize> {
        &self.dims
    }

    fn set_value_impl(&mut self, key: &str, value: String) {
        if let Some(item) = self.values.iter_mut().find(|item| item.name.eq_ignore_ascii_case(key)) {
            item.value = value;
        } else {
            self.values.push(Value { name: key.to_string(), value });
        }
    }

    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.set_value_impl(key, value.to_string());
    }

    pub fn set_f64(&mut self, key: &str, value: f64) {
        self.set_value_impl(key, format!("{:E}", value));
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        let values_str = if value { "T" } else { "F" };
        self.set_value_impl(key, values_str.to_string());
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.set_value_impl(key, format!("'{:<8}'", value));
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColumnType {
    Byte,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ColumnType {
    fn from_tform(form: &str) -> Option<Self> {
        match form.trim().chars().last()? {
            'B' => Some(Self::Byte),
            'I' => Some(Self::I16),
            'J' => Some(Self::I32),
            'K' => Some(Self::I64),
            'E' => Some(Self::F32),
            'D' => Some(Self::F64),
            _   => None,
        }
    }

    fn len(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::I16  => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    fn decode(self, bytes: &[u8]) -> f64 {
        let arr = |n: usize| {
            let mut result = [0_u8; 8];
            result[..n].copy_from_slice(&bytes[..n]);
            result
        };
        match self {
            Self::Byte => bytes[0] as f64,
            Self::I16 => {
                let a = arr(2);
                i16::from_be_bytes([a[0], a[1]]) as f64
            }
            Self::I32 => {
                let a = arr(4);
                i32::from_be_bytes([a[0], a[1], a[2], a[3]]) as f64
            }
            Self::F32 => {
                let a = arr(4);
                f32::from_be_bytes([a[0], a[1], a[2], a[3]]) as f64
            }
            Self::I64 => i64::from_be_bytes(arr(8)) as f64,
            Self::F64 => f64::from_be_bytes(arr(8)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TableColumn {
    pub name:   String,
    pub type_:  ColumnType,
    offset:     usize,
}

///////////////////////////////////////////////////////////////////////////////

pub struct FitsReader {
    pub headers: Vec<Header>,
}

impl FitsReader {
    pub fn new(stream: &mut dyn SeekNRead) -> Result<FitsReader> {
        stream.seek(SeekFrom::Start(0))?;

        let hdus = Self::read_all_headers(stream)?;
        Ok(Self { headers: hdus })
    }

    fn read_all_headers(stream: &mut dyn SeekNRead) -> Result<Vec<Header>> {
        let mut result = Vec::new();

        loop {
            let hdu_res = Self::read_header(stream);
            let hdu = match hdu_res {
                Ok(hdu) => hdu,
                Err(err) => {
                    if err.kind() == ErrorKind::UnexpectedEof { break; }
                    else { return Err(err); }
                }
            };

            // data unit is padded to whole blocks
            let size = hdu.bytes_len.div_ceil(BLOCK_LEN) * BLOCK_LEN;
            result.push(hdu);
            stream.seek(SeekFrom::Current(size as i64))?;
        }

        Ok(result)
    }

    fn read_header(stream: &mut dyn SeekNRead) -> Result<Header> {
        let mut buf = [0_u8; BLOCK_LEN];
        let mut values = Vec::new();
        let mut last_block = false;
        loop {
            stream.read_exact(&mut buf)?;
            for line in buf.chunks(80) {
                let line = std::str::from_utf8(line)
                    .map_err(|e| Error::new(ErrorKind::InvalidData, e))?
                    .trim();
                if let Some((key, value_and_comment)) = line.split_once("=") {
                    let value = strip_comment(value_and_comment.trim());
                    values.push(Value {
                        name:  key.trim().to_string(),
                        value: value.trim().to_string(),
                    });
                }
                if line.eq_ignore_ascii_case("end") {
                    last_block = true;
                }
            }
            if last_block {
                break;
            }
        }

        let ndim: usize = Header::get_value_impl(&values, "NAXIS").unwrap_or(0);
        let gcount: usize = Header::get_value_impl(&values, "GCOUNT").unwrap_or(1);
        let pcount: usize = Header::get_value_impl(&values, "PCOUNT").unwrap_or(0);
        let bitpix: i8 = Header::get_value_impl(&values, "BITPIX").unwrap_or(8);

        let mut dims = Vec::new();
        let mut data_len = if ndim == 0 { 0_usize } else { 1_usize };
        for idx in 1 ..= ndim {
            let key = format!("NAXIS{}", idx);
            let dim: usize = Header::get_value_impl(&values, &key).unwrap_or(1);
            data_len *= dim;
            dims.push(dim);
        }
        data_len += pcount;
        data_len *= gcount;

        let byte_per_value = (bitpix.unsigned_abs() / 8) as usize;
        let bytes_len = data_len * byte_per_value;
        let data_pos = stream.stream_position().unwrap_or(0) as usize;

        Ok(Header{values, dims, data_pos, bytes_len})
    }

    /// Reads one row of BINTABLE. Returns first element of every column.
    pub fn read_table_row(
        header: &Header,
        stream: &mut dyn SeekNRead,
        row:    usize,
    ) -> Result<Vec<f64>> {
        if !header.is_bintable() {
            return Err(Error::new(ErrorKind::InvalidData, "HDU is not BINTABLE"));
        }
        let row_len = header.dims.first().copied().unwrap_or(0);
        let rows = header.dims.get(1).copied().unwrap_or(0);
        if row >= rows {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("Row {} requested but table has {} rows", row, rows)
            ));
        }
        let columns = header.table_columns()?;
        let mut buf = vec![0_u8; row_len];
        stream.seek(SeekFrom::Start((header.data_pos + row * row_len) as u64))?;
        stream.read_exact(&mut buf)?;
        columns.iter()
            .map(|col| {
                let end = col.offset + col.type_.len();
                if end > buf.len() {
                    return Err(Error::new(ErrorKind::InvalidData, "Column is out of row"));
                }
                Ok(col.type_.decode(&buf[col.offset..end]))
            })
            .collect()
    }
}

fn strip_comment(text: &str) -> &str {
    // slash inside quoted string is not comment delimiter
    if text.starts_with('\'') {
        if let Some(end) = text[1..].find('\'') {
            return &text[..end + 2];
        }
    }
    text.split_once('/').map(|(value, _)| value).unwrap_or(text)
}

///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
pub struct FitsTableCol {
    pub name: &'static str,
    pub type_: &'static str,
    pub unit: &'static str,
}

#[cfg(test)]
pub struct FitsWriter {}

#[cfg(test)]
impl FitsWriter {
    pub fn new() -> Self {
        Self {}
    }

    pub fn write_header(&self, stream: &mut dyn SeekNWrite, hdu: &Header) -> Result<()> {
        for item in &hdu.values {
            let mut line = format!("{:8}= ", item.name);
            if item.value.starts_with("'") {
                line.push_str(&format!("{:<20}", item.value))
            } else {
                line.push_str(&format!("{:>20}", item.value))
            }
            while line.len() < 80 { line.push(' '); }
            while line.len() > 80 { line.pop(); }
            stream.write_all(line.as_bytes())?;
        }
        write!(stream, "{:80}", "END")?;
        let lines_written = hdu.values.len() + 1;
        let lines_to_complete = (36 - lines_written % 36) % 36;
        for _ in 0..lines_to_complete {
            write!(stream, "{:80}", "")?;
        }
        Ok(())
    }

    pub fn write_header_and_bintable_f64(
        &self,
        stream: &mut dyn SeekNWrite,
        hdu:    &Header,
        cols:   &[FitsTableCol],
        data:   &[f64],
    ) -> Result<()> {
        let len = data.len() / cols.len();
        let mut full_hdr = Header::new();
        full_hdr.set_str("XTENSION", "BINTABLE");
        full_hdr.set_i64("BITPIX", 8);
        full_hdr.set_i64("NAXIS", 2);
        full_hdr.set_i64("NAXIS1", (8 * cols.len()) as i64);
        full_hdr.set_i64("NAXIS2", len as i64);
        full_hdr.set_i64("PCOUNT", 0);
        full_hdr.set_i64("GCOUNT", 1);
        full_hdr.set_i64("TFIELDS", cols.len() as i64);

        for (idx, col) in cols.iter().enumerate() {
            full_hdr.set_str(&format!("TTYPE{}", idx + 1), col.name);
            full_hdr.set_str(&format!("TFORM{}", idx + 1), col.type_);
        }
        for (idx, col) in cols.iter().enumerate() {
            full_hdr.set_str(&format!("TUNIT{}", idx + 1), col.unit);
        }

        for value in &hdu.values {
            full_hdr.values.push(value.clone());
        }

        self.write_header(stream, &full_hdr)?;
        self.write_data_f64(stream, data)?;
        Ok(())
    }

    fn write_data_f64(
        &self,
        stream: &mut dyn SeekNWrite,
        data:   &[f64],
    ) -> Result<()> {
        use itertools::{Itertools, izip};
        let item_len = std::mem::size_of::<f64>();
        const BUF_DATA_LEN: usize = 512;
        let mut stream_buf = vec![0_u8; BUF_DATA_LEN * item_len];
        let mut written = 0_usize;
        for chunk in data.chunks(BUF_DATA_LEN) {
            let buf = &mut stream_buf[.. item_len * chunk.len()];
            for ((b1, b2, b3, b4, b5, b6, b7, b8), v) in izip!(buf.iter_mut().tuples(), chunk) {
                [*b1, *b2, *b3, *b4, *b5, *b6, *b7, *b8] = v.to_be_bytes();
            }
            stream.write_all(buf)?;
            written += buf.len();
        }

        written %= BLOCK_LEN;
        if written != 0 {
            stream.write_all(&vec![0_u8; BLOCK_LEN - written])?;
        }

        Ok(())
    }
}

/// Writes header-only FITS file (`NAXIS = 0`) with given values
#[cfg(test)]
pub fn write_header_only_file(path: &std::path::Path, values: &Header) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    let mut hdr = Header::new();
    hdr.set_bool("SIMPLE", true);
    hdr.set_i64("BITPIX", 8);
    hdr.set_i64("NAXIS", 0);
    for value in &values.values {
        hdr.values.push(value.clone());
    }
    FitsWriter::new().write_header(&mut file, &hdr)
}

#[test]
fn test_bintable_write_and_read() {
    let path = std::env::temp_dir().join(format!("efinder_fits_test_{}.axy", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    let writer = FitsWriter::new();
    let mut main_header = Header::new();
    main_header.set_bool("SIMPLE", true);
    main_header.set_i64("BITPIX", 8);
    main_header.set_i64("NAXIS", 0);
    writer.write_header(&mut file, &main_header).unwrap();
    let cols = [
        FitsTableCol { name: "X", type_: "1D", unit: "pix" },
        FitsTableCol { name: "Y", type_: "1D", unit: "pix" },
        FitsTableCol { name: "FLUX", type_: "1D", unit: "unknown" },
    ];
    let data = [512.5, 300.25, 1000.0, 20.0, 30.0, 5.0];
    writer.write_header_and_bintable_f64(&mut file, &Header::new(), &cols, &data).unwrap();
    drop(file);

    let mut file = std::fs::File::open(&path).unwrap();
    let reader = FitsReader::new(&mut file).unwrap();
    assert_eq!(reader.headers.len(), 2);
    let table = &reader.headers[1];
    assert!(table.is_bintable());
    assert_eq!(table.dims(), &vec![24, 2]);
    let columns = table.table_columns().unwrap();
    assert_eq!(columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), ["X", "Y", "FLUX"]);
    assert_eq!(FitsReader::read_table_row(table, &mut file, 0).unwrap(), vec![512.5, 300.25, 1000.0]);
    assert_eq!(FitsReader::read_table_row(table, &mut file, 1).unwrap(), vec![20.0, 30.0, 5.0]);
    assert!(FitsReader::read_table_row(table, &mut file, 2).is_err());
    drop(file);
    _ = std::fs::remove_file(&path);
}

#[test]
fn test_header_values() {
    let path = std::env::temp_dir().join(format!("efinder_fits_test_{}.wcs", std::process::id()));
    let mut values = Header::new();
    values.set_str("CTYPE1", "RA---TAN");
    values.set_f64("CRVAL1", 250.42);
    values.set_f64("CD1_1", -4.1666e-3);
    values.set_i64("IMAGEW", 1280);
    write_header_only_file(&path, &values).unwrap();

    let mut file = std::fs::File::open(&path).unwrap();
    let reader = FitsReader::new(&mut file).unwrap();
    assert_eq!(reader.headers.len(), 1);
    let hdr = &reader.headers[0];
    assert_eq!(hdr.get_str("CTYPE1"), Some("RA---TAN"));
    assert_eq!(hdr.get_f64("CRVAL1"), Some(250.42));
    assert_eq!(hdr.get_f64("CD1_1"), Some(-4.1666e-3));
    assert_eq!(hdr.get_i64("IMAGEW"), Some(1280));
    assert!(!hdr.is_bintable());
    drop(file);
    _ = std::fs::remove_file(&path);
}
