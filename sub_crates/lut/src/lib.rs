//! Reads and writes 1D lookup tables in the Sony Imageworks `.spi1d`
//! format.

use std::io::{BufRead, BufReader, Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("lut i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed lut: {0}")]
    Format(String),
}

/// A 1D lookup table with one or more components, each sampled evenly
/// over `range`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lut1D {
    pub range: (f32, f32),
    pub components: Vec<Vec<f32>>,
}

impl Lut1D {
    pub fn len(&self) -> usize {
        self.components.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes one or more equal-length tables as the components of a
/// single `.spi1d` file.
pub fn write_spi1d<W: Write>(out: &mut W, range: (f32, f32), tables: &[&[f32]]) -> std::io::Result<()> {
    assert!(!tables.is_empty());
    let len = tables[0].len();
    assert!(tables.iter().all(|t| t.len() == len));

    out.write_all(b"Version 1\n")?;
    out.write_all(format!("From {:0.7} {:0.7}\n", range.0, range.1).as_bytes())?;
    out.write_all(format!("Length {}\n", len).as_bytes())?;
    out.write_all(format!("Components {}\n", tables.len()).as_bytes())?;
    out.write_all(b"{\n")?;
    for i in 0..len {
        let row: Vec<String> = tables.iter().map(|t| format!("{:0.7}", t[i])).collect();
        out.write_all(format!("  {}\n", row.join(" ")).as_bytes())?;
    }
    out.write_all(b"}\n")?;

    Ok(())
}

pub fn read_spi1d<R: Read>(input: R) -> Result<Lut1D, ReadError> {
    let reader = BufReader::new(input);

    let mut range = (0.0f32, 1.0f32);
    let mut length: Option<usize> = None;
    let mut component_count = 1usize;
    let mut components: Vec<Vec<f32>> = Vec::new();
    let mut in_body = false;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if in_body {
            if line.starts_with('}') {
                in_body = false;
                continue;
            }
            let values = line
                .split_whitespace()
                .map(|s| s.parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ReadError::Format(format!("bad table entry '{}': {}", line, e)))?;
            if values.len() != component_count {
                return Err(ReadError::Format(format!(
                    "expected {} components, got {}",
                    component_count,
                    values.len()
                )));
            }
            for (c, v) in components.iter_mut().zip(values) {
                c.push(v);
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("Version") => {}
            Some("From") => {
                let lo = parse_field(parts.next(), "From")?;
                let hi = parse_field(parts.next(), "From")?;
                range = (lo, hi);
            }
            Some("Length") => {
                length = Some(parse_field(parts.next(), "Length")?);
            }
            Some("Components") => {
                component_count = parse_field(parts.next(), "Components")?;
                if component_count == 0 {
                    return Err(ReadError::Format("zero components".into()));
                }
            }
            Some("{") => {
                components = vec![Vec::with_capacity(length.unwrap_or(0)); component_count];
                in_body = true;
            }
            Some(other) => {
                return Err(ReadError::Format(format!("unknown field '{}'", other)));
            }
            None => {}
        }
    }

    if components.is_empty() {
        return Err(ReadError::Format("missing table body".into()));
    }
    if let Some(length) = length {
        if components[0].len() != length {
            return Err(ReadError::Format(format!(
                "expected {} entries, got {}",
                length,
                components[0].len()
            )));
        }
    }

    Ok(Lut1D {
        range: range,
        components: components,
    })
}

fn parse_field<T: std::str::FromStr>(s: Option<&str>, field: &str) -> Result<T, ReadError> {
    s.and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| ReadError::Format(format!("bad '{}' field", field)))
}
