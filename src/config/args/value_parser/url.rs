use reqwest::Url;

const INVALID_SCHEME: &str = "URL scheme must be https:// or http://";
const MISSING_HOST: &str = "URL must contain a host name";
const UNEXPECTED_PATH: &str = "URL must not contain a path, query or fragment";

pub fn check_scheme(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(INVALID_SCHEME.to_string());
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(MISSING_HOST.to_string());
    }
    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(UNEXPECTED_PATH.to_string());
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(check_scheme("https://s3.amazonaws.com").is_ok());
        assert!(check_scheme("http://localhost:9000").is_ok());
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(
            check_scheme("ftp://example.com").unwrap_err(),
            INVALID_SCHEME.to_string()
        );
    }

    #[test]
    fn rejects_path_and_query() {
        for url in [
            "http://localhost:9000/s3",
            "https://s3.example.com/bucket/",
            "https://s3.example.com?x=1",
        ] {
            assert_eq!(check_scheme(url).unwrap_err(), UNEXPECTED_PATH.to_string());
        }
        assert!(check_scheme("http://localhost:9000/").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(check_scheme("not a url").is_err());
    }
}
