use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::time::timeout;

use crate::constants::MAX_COMMAND_LINE;
use crate::core::{error::Error, ConnectionStream};

/// Outcome of reading one command line.
pub(crate) enum ReadCommand {
    /// A complete line with the CRLF stripped.
    Line(Vec<u8>),
    /// The line exceeded the command-line limit; the remainder has been
    /// drained up to the next newline.
    TooLong,
}

/// Buffered halves of the connection with deadline-aware read and write
/// primitives. Rebuilt from scratch after a STARTTLS handshake so that
/// bytes buffered on the plaintext stream are discarded (RFC 3207).
pub(crate) struct StreamController {
    reader: BufReader<ReadHalf<ConnectionStream>>,
    writer: BufWriter<WriteHalf<ConnectionStream>>,
    pub(crate) is_tls: bool,
}

impl StreamController {
    pub(crate) fn new(stream: ConnectionStream) -> Self {
        let is_tls = stream.is_tls();
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            is_tls,
        }
    }

    /// Reassembles the underlying stream, dropping any buffered input.
    pub(crate) fn into_stream(self) -> ConnectionStream {
        self.reader.into_inner().unsplit(self.writer.into_inner())
    }

    /// Reads one command line of at most [`MAX_COMMAND_LINE`] octets.
    pub(crate) async fn read_command_line(&mut self) -> Result<ReadCommand, Error> {
        let mut buf = Vec::new();
        let n = (&mut self.reader)
            .take(MAX_COMMAND_LINE as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        if !buf.ends_with(b"\n") {
            if buf.len() >= MAX_COMMAND_LINE {
                loop {
                    buf.clear();
                    let n = (&mut self.reader)
                        .take(MAX_COMMAND_LINE as u64)
                        .read_until(b'\n', &mut buf)
                        .await?;
                    if n == 0 || buf.ends_with(b"\n") {
                        break;
                    }
                }
                return Ok(ReadCommand::TooLong);
            }
            return Err(Error::ConnectionClosed);
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(ReadCommand::Line(buf))
    }

    /// Reads one continuation line of an AUTH exchange, trimmed of
    /// trailing whitespace.
    pub(crate) async fn read_line(&mut self) -> Result<String, Error> {
        let mut buf = Vec::new();
        let n = (&mut self.reader)
            .take(MAX_COMMAND_LINE as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 || !buf.ends_with(b"\n") {
            return Err(Error::ConnectionClosed);
        }
        let mut line = String::from_utf8_lossy(&buf).into_owned();
        line.truncate(line.trim_end().len());
        Ok(line)
    }

    /// Reads a dot-terminated message body, reversing dot-stuffing and
    /// normalizing bare LF line endings to CRLF. An oversized body is
    /// consumed through to the terminating dot before the error returns,
    /// leaving the stream positioned at the next command.
    pub(crate) async fn read_mail_data(&mut self, max_size: u64) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        let mut line = Vec::new();
        let mut overflow = false;

        loop {
            line.clear();
            self.read_line_crlf(&mut line).await?;

            if line == b".\r\n" {
                break;
            }

            let processed: &[u8] = if line.starts_with(b".") {
                &line[1..]
            } else {
                &line
            };

            if overflow || (data.len() + processed.len()) as u64 > max_size {
                overflow = true;
                continue;
            }
            data.extend_from_slice(processed);
        }

        if overflow {
            return Err(Error::MaxSizeExceeded { limit: max_size });
        }
        Ok(data)
    }

    async fn read_line_crlf(&mut self, buffer: &mut Vec<u8>) -> Result<(), Error> {
        let n = self.reader.read_until(b'\n', buffer).await?;
        if n == 0 || !buffer.ends_with(b"\n") {
            return Err(Error::ConnectionClosed);
        }
        if !buffer.ends_with(b"\r\n") {
            buffer.pop();
            buffer.push(b'\r');
            buffer.push(b'\n');
        }
        Ok(())
    }

    /// Reads exactly `size` octets of a BDAT chunk.
    pub(crate) async fn read_chunk(&mut self, size: u64) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; size as usize];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Consumes and discards `size` octets, used to drain a refused chunk.
    pub(crate) async fn discard_chunk(&mut self, size: u64) -> Result<(), Error> {
        tokio::io::copy(&mut (&mut self.reader).take(size), &mut tokio::io::sink()).await?;
        Ok(())
    }

    pub(crate) async fn write_line(&mut self, line: &str, limit: Duration) -> Result<(), Error> {
        timeout(limit, async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\r\n").await?;
            self.writer.flush().await
        })
        .await??;
        Ok(())
    }

    /// Writes a batch of reply lines with a single flush, so pipelined
    /// replies hit the wire in command order.
    pub(crate) async fn write_lines(&mut self, lines: &[String], limit: Duration) -> Result<(), Error> {
        timeout(limit, async {
            for line in lines {
                self.writer.write_all(line.as_bytes()).await?;
                self.writer.write_all(b"\r\n").await?;
            }
            self.writer.flush().await
        })
        .await??;
        Ok(())
    }
}
