use crate::error::AppError;

/// Split a `Name: Value` argument into its trimmed name and value
pub fn parse_header(header_str: &str) -> Result<(String, String), AppError> {
    let Some((name, value)) = header_str.split_once(':') else {
        return Err(AppError::InvalidInput(format!(
            "Invalid header format: '{header_str}'. Expected 'Name: Value'"
        )));
    };

    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "Missing header name in '{header_str}'"
        )));
    }

    Ok((name.to_string(), value.trim().to_string()))
}

/// Parse every `-H` argument, failing on the first malformed one
pub fn parse_headers(header_strings: &[String]) -> Result<Vec<(String, String)>, AppError> {
    header_strings.iter().map(|h| parse_header(h)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "Referer: https://example.com/".to_string(),
            "X-Token:abc:def".to_string(),
        ])
        .unwrap();
        assert_eq!(
            headers,
            vec![
                ("Referer".to_string(), "https://example.com/".to_string()),
                ("X-Token".to_string(), "abc:def".to_string()),
            ]
        );
    }

    #[test]
    fn test_rejects_malformed_header() {
        assert!(parse_header("no colon here").is_err());
        assert!(parse_header(" : value").is_err());
    }
}
