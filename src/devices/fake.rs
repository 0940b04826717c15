use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Scripted stand-in for a serial port used in tests.
///
/// Each scripted chunk is handed out by one `read` call; an exhausted script
/// reads as end of stream. Everything written is recorded.
#[derive(Default)]
pub struct FakeSerial {
    script: VecDeque<io::Result<Vec<u8>>>,
    written: Vec<u8>,
}

impl FakeSerial {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            script: chunks
                .into_iter()
                .map(|chunk| Ok(chunk.as_ref().to_vec()))
                .collect(),
            written: Vec::new(),
        }
    }

    pub fn then(mut self, chunk: impl AsRef<[u8]>) -> Self {
        self.script.push_back(Ok(chunk.as_ref().to_vec()));
        self
    }

    pub fn then_timeout(mut self) -> Self {
        self.script.push_back(Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "Operation timed out",
        )));
        self
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }
}

impl Read for FakeSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.script.pop_front() {
            Some(Ok(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.script.push_front(Ok(chunk.split_off(n)));
                }
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }
}

impl Write for FakeSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_chunks_are_split_across_reads() {
        let mut fake = FakeSerial::new(["abcdef"]);
        let mut buf = [0u8; 4];
        assert_eq!(fake.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(fake.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(fake.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn scripted_timeout_is_returned_in_order() {
        let mut fake = FakeSerial::new(["a"]).then_timeout().then("b");
        let mut buf = [0u8; 8];
        assert_eq!(fake.read(&mut buf).unwrap(), 1);
        assert_eq!(
            fake.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::TimedOut
        );
        assert_eq!(fake.read(&mut buf).unwrap(), 1);
    }
}
