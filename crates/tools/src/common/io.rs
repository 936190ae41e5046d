//! 入出力ユーティリティ
//!
//! パスが `-` なら標準入出力、拡張子が `.gz` なら gzip として扱う。

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const READ_BUF_CAP: usize = 64 * 1024;

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// 行単位で読める入力を開く
pub fn open_input<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    if is_stdio(path) {
        return Ok(Box::new(BufReader::with_capacity(READ_BUF_CAP, io::stdin())));
    }
    let file = File::open(path)?;
    if is_gzip(path) {
        let decoder = flate2::read::GzDecoder::new(file);
        return Ok(Box::new(BufReader::with_capacity(READ_BUF_CAP, decoder)));
    }
    Ok(Box::new(BufReader::with_capacity(READ_BUF_CAP, file)))
}

/// 出力先
///
/// gzip の終端書き込みエラーを拾うため、最後に [`OutputSink::finish`] を呼ぶこと。
#[must_use = "call .finish() to flush the output"]
pub enum OutputSink {
    File(BufWriter<File>),
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    Stdout(io::Stdout),
}

impl OutputSink {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        if is_stdio(path) {
            return Ok(OutputSink::Stdout(io::stdout()));
        }
        let file = BufWriter::new(File::create(path)?);
        if is_gzip(path) {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            return Ok(OutputSink::Gzip(encoder));
        }
        Ok(OutputSink::File(file))
    }

    /// 書き込みを完了する
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputSink::File(mut w) => w.flush(),
            OutputSink::Gzip(encoder) => encoder.finish()?.flush(),
            OutputSink::Stdout(mut s) => s.flush(),
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::File(w) => w.write(buf),
            OutputSink::Gzip(w) => w.write(buf),
            OutputSink::Stdout(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::File(w) => w.flush(),
            OutputSink::Gzip(w) => w.flush(),
            OutputSink::Stdout(w) => w.flush(),
        }
    }
}
