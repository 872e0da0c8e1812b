/// Formats `buffer` as offset, hex bytes and printable characters, sixteen
/// bytes per line.
pub fn hexdump(buffer: &[u8]) -> String {
    let mut str = String::new();

    for (line_no, chunk) in buffer.chunks(16).enumerate() {
        let mut line = format!("{:04x}: ", line_no * 16);
        let mut chars = String::new();
        for &byte in chunk {
            line.push_str(&format!("{:02x} ", byte));
            let c = byte as char;
            chars.push(if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            });
        }

        str.push_str(&format!("{:<54} {}\n", line, chars));
    }

    str
}
