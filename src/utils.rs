use crate::error::{MergeError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek};
use std::path::Path;

pub fn open_file<P: AsRef<Path>>(path: P) -> Result<File> {
    File::open(&path).map_err(|e| {
        let e = if e.kind() == io::ErrorKind::NotFound {
            io::Error::new(e.kind(), format!("File not found: {:?}", path.as_ref()))
        } else {
            e
        };
        MergeError::io(path.as_ref(), e)
    })
}

/// Check the gzip magic bytes, leaving the file pointer at the start.
pub fn is_gzipped(file: &mut File) -> io::Result<bool> {
    let mut buffer = [0u8; 2];
    let mut filled = 0;
    while filled < buffer.len() {
        let n = file.read(&mut buffer[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    file.rewind()?;
    Ok(filled == 2 && buffer == [0x1F, 0x8B])
}

/// Buffered line reader over a plain or gzip compressed file.
pub fn dyn_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let mut file = open_file(&path)?;
    let gz = is_gzipped(&mut file).map_err(|e| MergeError::io(path.as_ref(), e))?;
    if gz {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Iterate the lines of a file with their 1-based line numbers.
pub fn read_lines<P: AsRef<Path>>(
    path: P,
) -> Result<impl Iterator<Item = Result<(usize, String)>>> {
    let owned = path.as_ref().to_path_buf();
    let reader = dyn_reader(&owned)?;
    Ok(reader.lines().enumerate().map(move |(i, line)| {
        line.map(|l| (i + 1, l))
            .map_err(|e| MergeError::io(&owned, e))
    }))
}

pub fn parse_comma_separated_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
