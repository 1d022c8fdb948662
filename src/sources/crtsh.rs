use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::domain::{is_valid_hostname, unique};
use crate::error::DomainError;
use crate::sources::is_html_response;

pub const DEFAULT_BASE_URL: &str = "https://crt.sh";

#[derive(Clone)]
pub struct CrtShSource {
    client: Arc<Client>,
    base_url: String,
}

/// One entry of the crt.sh JSON output. Both fields hold newline separated names.
#[derive(Debug, Deserialize)]
struct CertificateRecord {
    common_name: String,
    name_value: String,
}

impl CrtShSource {
    pub fn new(client: Arc<Client>, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn query_url(&self, domain: &str) -> String {
        // `domain` is already percent-encoded; `%25.` is the `%.` wildcard prefix
        format!("{}/?q=%25.{}&output=json", self.base_url, domain)
    }

    /// Fetches the raw JSON document listing the certificates issued for `domain`.
    pub async fn fetch(&self, domain: &str) -> Result<String, DomainError> {
        let start_time = Instant::now();
        let url = self.query_url(domain);
        debug!("Querying crt.sh: {}", url);

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            debug!("crt.sh returned {} for {}", status, domain);
            return Err(DomainError::Status(status));
        }

        let text = response.text().await?;
        debug!(
            "crt.sh answered for {} with {} bytes in {:?}",
            domain,
            text.len(),
            start_time.elapsed()
        );
        Ok(text)
    }
}

/// Pulls every valid hostname out of a crt.sh JSON document.
///
/// Names come out in document order, `common_name` before `name_value` within a
/// record, each one only once.
pub fn extract_subdomains(json: &str) -> Result<Vec<String>, DomainError> {
    let records = parse_records(json)?;

    let candidates: Vec<String> = records
        .iter()
        .flat_map(|record| {
            record
                .common_name
                .split('\n')
                .chain(record.name_value.split('\n'))
        })
        .map(str::trim)
        .filter(|name| is_valid_hostname(name))
        .map(str::to_string)
        .collect();

    let subdomains = unique(candidates);
    debug!(
        "Extracted {} subdomains from {} certificates",
        subdomains.len(),
        records.len()
    );
    Ok(subdomains)
}

fn parse_records(json: &str) -> Result<Vec<CertificateRecord>, DomainError> {
    if is_html_response(json) {
        return Err(DomainError::MalformedResponse(
            "got an HTML page instead of JSON".to_string(),
        ));
    }

    let entries: Vec<Value> = serde_json::from_str(json).map_err(|e| {
        DomainError::MalformedResponse(format!("expected a JSON array of certificates: {}", e))
    })?;

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value(entry).map_err(|e| {
                DomainError::MalformedResponse(format!("certificate #{}: {}", index, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::create_client;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE: &str = r#"[{"issuer_ca_id":185756,"issuer_name":"C=US, O=DigiCert Inc, CN=DigiCert TLS RSA SHA256 2020 CA1","common_name":"dev.example.com\nexample.com\nproducts.example.com\nsupport.example.com\nwww.example.com","name_value":"mail.example.com\ndev.example.com","id":3704614715,"entry_timestamp":"2020-11-27T13:49:06.706","not_before":"2020-11-24T00:00:00","not_after":"2021-12-25T23:59:59","serial_number":"0fbe08b0854d05738ab0cce1c9afeec9"},{"issuer_ca_id":185756,"issuer_name":"C=US, O=DigiCert Inc, CN=DigiCert TLS RSA SHA256 2020 CA1","common_name":"www.example.org","name_value":"test.example.com","id":3704614715,"entry_timestamp":"2020-11-27T13:49:06.706","not_before":"2020-11-24T00:00:00","not_after":"2021-12-25T23:59:59","serial_number":"0fbe08b0854d05738ab0cce1c9afeec9"}]"#;

    fn source(server: &MockServer) -> CrtShSource {
        let client = create_client(Duration::from_secs(5), None).unwrap();
        CrtShSource::new(client, &server.uri())
    }

    #[test]
    fn test_extract_subdomains_keeps_document_order() {
        let want = vec![
            "dev.example.com",
            "example.com",
            "products.example.com",
            "support.example.com",
            "www.example.com",
            "mail.example.com",
            "www.example.org",
            "test.example.com",
        ];
        assert_eq!(extract_subdomains(SAMPLE).unwrap(), want);
    }

    #[test]
    fn test_extract_subdomains_drops_invalid_names() {
        let json = r#"[{"common_name":"*.example.com","name_value":"a.example.com\r\nfail/test.org\ninvalid@example.com\n\nB.example.com"}]"#;
        assert_eq!(extract_subdomains(json).unwrap(), vec!["a.example.com"]);
    }

    #[test]
    fn test_extract_subdomains_empty_array() {
        assert!(extract_subdomains("[]").unwrap().is_empty());
    }

    #[test]
    fn test_extract_subdomains_rejects_wrong_shape() {
        let cases = [
            r#"{"common_name":"a.example.com","name_value":"b.example.com"}"#,
            r#"[{"common_name":"a.example.com"}]"#,
            r#"[{"common_name":null,"name_value":"b.example.com"}]"#,
            r#"[{"common_name":1,"name_value":"b.example.com"}]"#,
            r#"["a.example.com"]"#,
            "not json",
        ];
        for json in cases {
            let err = extract_subdomains(json).unwrap_err();
            assert!(
                matches!(err, DomainError::MalformedResponse(_)),
                "{:?} gave {:?}",
                json,
                err
            );
        }
    }

    #[test]
    fn test_extract_subdomains_names_bad_record() {
        let json = r#"[{"common_name":"a.example.com","name_value":""},{"name_value":"b.example.com"}]"#;
        let err = extract_subdomains(json).unwrap_err();
        assert!(err.to_string().contains("certificate #1"), "{}", err);
    }

    #[test]
    fn test_extract_subdomains_rejects_html() {
        let err = extract_subdomains("<!DOCTYPE html><html><body>502</body></html>").unwrap_err();
        assert!(matches!(err, DomainError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_sends_wildcard_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("q", "%.example.com"))
            .and(query_param("output", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .expect(1)
            .mount(&server)
            .await;

        let body = source(&server).fetch("example.com").await.unwrap();
        assert_eq!(body, SAMPLE);
    }

    #[tokio::test]
    async fn test_fetch_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = source(&server).fetch("example.com").await.unwrap_err();
        assert!(matches!(err, DomainError::Status(status) if status.as_u16() == 502));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_is_transport_error() {
        let client = create_client(Duration::from_secs(2), None).unwrap();
        let source = CrtShSource::new(client, "http://127.0.0.1:1");

        let err = source.fetch("example.com").await.unwrap_err();
        assert!(matches!(err, DomainError::Transport(_)));
    }
}
