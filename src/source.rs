use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
};

/// Something the lexer can pull characters out of, one at a time.
///
/// `Ok(None)` marks the end of input. Sources are not rewindable.
pub trait CharSource {
    fn next_char(&mut self) -> io::Result<Option<char>>;
}

impl<S: CharSource + ?Sized> CharSource for &mut S {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        (**self).next_char()
    }
}

/// In-memory source over an owned string.
#[derive(Debug, Clone)]
pub struct StrSource {
    text: String,
    index: usize,
}

impl StrSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            index: 0,
        }
    }
}

impl CharSource for StrSource {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        match self.text[self.index..].chars().next() {
            Some(c) => {
                self.index += c.len_utf8();
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }
}

/// Buffered file source decoding utf-8 as it goes.
#[derive(Debug)]
pub struct FileSource<R = File> {
    reader: BufReader<R>,
}

impl FileSource<File> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::from_reader(File::open(path)?))
    }
}

impl<R: Read> FileSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = match self.reader.fill_buf()?.first() {
            Some(&b) => b,
            None => return Ok(None),
        };
        self.reader.consume(1);
        Ok(Some(byte))
    }
}

fn invalid_utf8() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid utf-8")
}

impl<R: Read> CharSource for FileSource<R> {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        let lead = match self.next_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        let width = match lead {
            0x00..=0x7f => return Ok(Some(lead as char)),
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return Err(invalid_utf8()),
        };

        let mut buf = [lead, 0, 0, 0];
        for slot in buf.iter_mut().take(width).skip(1) {
            *slot = self.next_byte()?.ok_or_else(invalid_utf8)?;
        }
        std::str::from_utf8(&buf[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .map(Some)
            .ok_or_else(invalid_utf8)
    }
}
