use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Thin PostgREST client for the clinic's Supabase project.
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Service-level reads fall back to the anon key as bearer.
        let bearer = auth_token.unwrap_or(&self.anon_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", bearer))?,
        );

        Ok(headers)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making request to {}", url);

        let mut req = self
            .client
            .request(method, &url)
            .headers(self.get_headers(auth_token)?);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// First row of `table` where `column = value`, if any.
    pub async fn fetch_one(
        &self,
        table: &str,
        column: &str,
        value: &str,
        auth_token: Option<&str>,
    ) -> Result<Option<Value>> {
        let path = format!("/rest/v1/{}?{}=eq.{}&limit=1", table, column, value);

        let rows: Vec<Value> = self.request(Method::GET, &path, auth_token, None).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn get_service(&self, service_id: &str) -> Result<Option<Value>> {
        self.fetch_one("services", "id", service_id, None).await
    }

    pub async fn get_patient_balance(&self, patient_id: &str) -> Result<Option<Value>> {
        self.fetch_one("patient_balances", "patient_id", patient_id, None).await
    }

    pub async fn get_clinical_record(
        &self,
        patient_id: &str,
        auth_token: Option<&str>,
    ) -> Result<Option<Value>> {
        self.fetch_one("clinical_records", "patient_id", patient_id, auth_token).await
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SupabaseClient {
        SupabaseClient::new(&AppConfig {
            supabase_url: server.uri(),
            supabase_anon_key: "anon".to_string(),
            ..AppConfig::default()
        })
    }

    #[tokio::test]
    async fn fetch_one_returns_first_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/services"))
            .and(query_param("id", "eq.svc-1"))
            .and(header("apikey", "anon"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "svc-1", "name": "Ultrasound"}
            ])))
            .mount(&server)
            .await;

        let row = client_for(&server).get_service("svc-1").await.unwrap();
        assert_eq!(row.unwrap()["name"], "Ultrasound");
    }

    #[tokio::test]
    async fn fetch_one_empty_result_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/patient_balances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let row = client_for(&server).get_patient_balance("p-1").await.unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn http_errors_surface_as_err() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/clinical_records"))
            .respond_with(ResponseTemplate::new(401).set_body_string("jwt expired"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_clinical_record("p-1", Some("token"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Authentication error"));
    }
}
