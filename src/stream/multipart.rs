//! `multipart/x-mixed-replace` framing

use bytes::{BufMut, Bytes, BytesMut};

pub const BOUNDARY: &str = "frame";

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// One part: boundary line, headers, blank line, JPEG body, CRLF
pub fn part(jpeg: &[u8]) -> Bytes {
    let head = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut buf = BytesMut::with_capacity(head.len() + jpeg.len() + 2);
    buf.put_slice(head.as_bytes());
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_layout() {
        let part = part(b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
        assert_eq!(content_type(), "multipart/x-mixed-replace; boundary=frame");
    }
}
