//! 透明压缩层
//!
//! 按 [`Compression`] 选择明文或 gzip，对调用方统一暴露 `Write` / `BufRead`。

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::Compression;

/// 写入端
pub enum FileEncoder {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FileEncoder {
    /// 创建（或覆盖）目标文件，必要时补建父目录
    pub fn create(
        path: &Path,
        compression: Compression,
    ) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let writer = BufWriter::new(File::create(path)?);
        Ok(match compression {
            Compression::None => FileEncoder::Plain(writer),
            Compression::Gzip => FileEncoder::Gzip(GzEncoder::new(writer, flate2::Compression::default())),
        })
    }

    /// 刷新缓冲并写出 gzip 尾部；不调用则写入错误可能被吞掉
    pub fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            FileEncoder::Plain(writer) => writer,
            FileEncoder::Gzip(encoder) => encoder.finish()?,
        };
        inner.flush()?;
        inner.get_ref().sync_all()
    }
}

impl Write for FileEncoder {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        match self {
            FileEncoder::Plain(w) => w.write(buf),
            FileEncoder::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileEncoder::Plain(w) => w.flush(),
            FileEncoder::Gzip(w) => w.flush(),
        }
    }
}

/// 读取端
pub enum FileDecoder {
    Plain(BufReader<File>),
    Gzip(BufReader<GzDecoder<File>>),
}

impl FileDecoder {
    pub fn open(
        path: &Path,
        compression: Compression,
    ) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(match compression {
            Compression::None => FileDecoder::Plain(BufReader::new(file)),
            Compression::Gzip => FileDecoder::Gzip(BufReader::new(GzDecoder::new(file))),
        })
    }

    /// 丢弃第一行（含换行符），返回丢弃的字节数；空文件返回 0
    pub fn skip_line(&mut self) -> io::Result<usize> {
        let mut line = String::new();
        self.read_line(&mut line)
    }
}

impl Read for FileDecoder {
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        match self {
            FileDecoder::Plain(r) => r.read(buf),
            FileDecoder::Gzip(r) => r.read(buf),
        }
    }
}

impl BufRead for FileDecoder {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            FileDecoder::Plain(r) => r.fill_buf(),
            FileDecoder::Gzip(r) => r.fill_buf(),
        }
    }

    fn consume(
        &mut self,
        amt: usize,
    ) {
        match self {
            FileDecoder::Plain(r) => r.consume(amt),
            FileDecoder::Gzip(r) => r.consume(amt),
        }
    }
}
