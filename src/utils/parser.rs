use base64::{engine::general_purpose, Engine as _};

pub fn parse_b64_line(line: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD.decode(line.trim())
}

pub fn parse_ext_param(param: &str) -> Option<(&str, &str)> {
    param.split_once('=')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_lines() {
        assert_eq!(parse_b64_line("YWxpY2U=").unwrap(), b"alice");
        assert_eq!(parse_b64_line("  YWxpY2U=  ").unwrap(), b"alice");
        assert!(parse_b64_line("not base64!").is_err());
    }

    #[test]
    fn splits_extension_parameters() {
        assert_eq!(parse_ext_param("SIZE=1234"), Some(("SIZE", "1234")));
        assert_eq!(parse_ext_param("BODY=8BITMIME"), Some(("BODY", "8BITMIME")));
        assert_eq!(parse_ext_param("NOVALUE"), None);
    }
}
