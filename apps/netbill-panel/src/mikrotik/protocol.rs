//! RouterOS API wire format.
//!
//! A sentence is a sequence of length-prefixed words terminated by an empty
//! word. Replies start with `!re`, `!done`, `!trap`, `!fatal` or `!empty`.

use std::collections::HashMap;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single word; RouterOS never sends anything close.
const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

pub type Attributes = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Re(Attributes),
    Done(Attributes),
    Trap(String),
    Fatal(String),
    Empty,
}

pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    let len = len as u32;
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x4000 {
        out.extend_from_slice(&((len | 0x8000) as u16).to_be_bytes());
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        out.extend_from_slice(&v.to_be_bytes()[1..]);
    } else if len < 0x1000_0000 {
        out.extend_from_slice(&(len | 0xE000_0000).to_be_bytes());
    } else {
        out.push(0xF0);
        out.extend_from_slice(&len.to_be_bytes());
    }
}

pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        encode_length(bytes.len(), &mut out);
        out.extend_from_slice(bytes);
    }
    out.push(0);
    out
}

pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<usize> {
    let first = reader.read_u8().await?;
    let (extra, initial) = if first & 0x80 == 0 {
        (0, u32::from(first))
    } else if first & 0xC0 == 0x80 {
        (1, u32::from(first & 0x3F))
    } else if first & 0xE0 == 0xC0 {
        (2, u32::from(first & 0x1F))
    } else if first & 0xF0 == 0xE0 {
        (3, u32::from(first & 0x0F))
    } else if first == 0xF0 {
        (4, 0)
    } else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("invalid length prefix 0x{:02x}", first)));
    };

    let mut len = initial;
    for _ in 0..extra {
        len = (len << 8) | u32::from(reader.read_u8().await?);
    }
    Ok(len as usize)
}

pub async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Vec<String>> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        if len > MAX_WORD_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "word exceeds maximum length"));
        }
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        words.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

pub async fn write_sentence<W: AsyncWrite + Unpin, S: AsRef<str>>(writer: &mut W, words: &[S]) -> io::Result<()> {
    writer.write_all(&encode_sentence(words)).await?;
    writer.flush().await
}

/// Splits `=key=value` words into attributes; `.tag` and other words are skipped.
pub fn parse_attributes(words: &[String]) -> Attributes {
    words
        .iter()
        .filter_map(|w| w.strip_prefix('='))
        .filter_map(|w| w.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn parse_reply(words: &[String]) -> io::Result<Reply> {
    let Some(kind) = words.first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty reply sentence"));
    };
    let rest = &words[1..];
    match kind.as_str() {
        "!re" => Ok(Reply::Re(parse_attributes(rest))),
        "!done" => Ok(Reply::Done(parse_attributes(rest))),
        "!empty" => Ok(Reply::Empty),
        "!trap" => {
            let attrs = parse_attributes(rest);
            Ok(Reply::Trap(attrs.get("message").cloned().unwrap_or_else(|| "unknown failure".to_string())))
        }
        // `!fatal` carries the reason as a bare word.
        "!fatal" => Ok(Reply::Fatal(rest.first().cloned().unwrap_or_else(|| "connection closed".to_string()))),
        other => Err(io::Error::new(io::ErrorKind::InvalidData, format!("unexpected reply word {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_boundaries() {
        let cases: [(usize, &[u8]); 6] = [
            (0x00, &[0x00]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x3FFF, &[0xBF, 0xFF]),
            (0x4000, &[0xC0, 0x40, 0x00]),
            (0x20_0000, &[0xE0, 0x20, 0x00, 0x00]),
        ];
        for (len, expected) in cases {
            let mut out = Vec::new();
            encode_length(len, &mut out);
            assert_eq!(out, expected, "len {len:#x}");
        }
    }

    #[tokio::test]
    async fn reads_back_long_words() {
        let long = "x".repeat(300);
        let bytes = encode_sentence(&["/ppp/secret/print", long.as_str()]);
        let mut reader = bytes.as_slice();
        let words = read_sentence(&mut reader).await.unwrap();
        assert_eq!(words, vec!["/ppp/secret/print".to_string(), long]);
    }

    #[tokio::test]
    async fn sentences_cross_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            write_sentence(&mut a, &["!re", "=.id=*1A", "=name=budi"]).await.unwrap();
            write_sentence(&mut a, &["!done"]).await.unwrap();
        });
        let first = read_sentence(&mut b).await.unwrap();
        let second = read_sentence(&mut b).await.unwrap();
        writer.await.unwrap();

        match parse_reply(&first).unwrap() {
            Reply::Re(attrs) => {
                assert_eq!(attrs.get(".id").map(String::as_str), Some("*1A"));
                assert_eq!(attrs.get("name").map(String::as_str), Some("budi"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(parse_reply(&second).unwrap(), Reply::Done(Attributes::new()));
    }

    #[test]
    fn trap_message_and_values_with_equals() {
        let trap = vec!["!trap".to_string(), "=category=0".into(), "=message=no such item".into()];
        assert_eq!(parse_reply(&trap).unwrap(), Reply::Trap("no such item".into()));

        let attrs = parse_attributes(&["=comment=a=b".to_string(), ".tag=7".to_string()]);
        assert_eq!(attrs.get("comment").map(String::as_str), Some("a=b"));
        assert_eq!(attrs.len(), 1);
    }

    #[tokio::test]
    async fn invalid_prefix_is_rejected() {
        let mut reader: &[u8] = &[0xF8];
        assert!(read_length(&mut reader).await.is_err());
    }
}
