//! Catalogue client tests against a stubbed directory index

use cnpj_ingest::error::PipelineError;
use cnpj_ingest::services::ReceitaClient;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INDEX_HTML: &str = r#"
<html><body>
<table>
  <tr><td><a href="../">Parent Directory</a></td></tr>
  <tr><td><a href="2024-04/">2024-04/</a></td><td>2024-04-12 08:00</td><td>-</td></tr>
  <tr><td><a href="2024-05/">2024-05/</a></td><td>2024-05-14 08:00</td><td>-</td></tr>
  <tr><td><a href="2023-12/">2023-12/</a></td><td>2023-12-11 08:00</td><td>-</td></tr>
  <tr><td><a href="regimes_tributarios/">regimes_tributarios/</a></td></tr>
</table>
</body></html>
"#;

const RELEASE_HTML: &str = r#"
<html><body>
<table>
  <tr><th>Name</th><th></th><th>Last modified</th><th>Size</th></tr>
  <tr><td><img alt="[ ]"></td><td><a href="Empresas0.zip">Empresas0.zip</a></td><td>2024-05-14 10:01</td><td>232M</td></tr>
  <tr><td><img alt="[ ]"></td><td><a href="Estabelecimentos0.zip">Estabelecimentos0.zip</a></td><td>2024-05-14 10:22</td><td>1.1G</td></tr>
  <tr><td><img alt="[ ]"></td><td><a href="LEIAME.pdf">LEIAME.pdf</a></td><td>2024-05-14 09:00</td><td>12K</td></tr>
</table>
</body></html>
"#;

async fn client_for(server: &MockServer) -> ReceitaClient {
    ReceitaClient::new(&format!("{}/", server.uri()), 5).unwrap()
}

#[tokio::test]
async fn lists_releases_in_ascending_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INDEX_HTML))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let releases = client.list_releases().await.unwrap();
    assert_eq!(releases, vec!["2023-12", "2024-04", "2024-05"]);
    assert_eq!(client.latest_release().await.unwrap(), "2024-05");
}

#[tokio::test]
async fn empty_index_is_no_releases_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><table></table></html>"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.latest_release().await.unwrap_err();
    assert!(matches!(err, PipelineError::NoReleasesFound(_)));
}

#[tokio::test]
async fn upstream_failure_is_catalogue_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.list_releases().await.unwrap_err();
    assert!(matches!(err, PipelineError::CatalogueUnavailable(_)));
}

#[tokio::test]
async fn lists_only_zip_files_with_index_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2024-05/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RELEASE_HTML))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let files = client.list_files("2024-05").await.unwrap();
    assert_eq!(files.len(), 2);

    assert_eq!(files[0].name, "Empresas0.zip");
    assert_eq!(
        files[0].url,
        format!("{}/2024-05/Empresas0.zip", server.uri())
    );
    assert_eq!(files[0].last_modified.as_deref(), Some("2024-05-14 10:01"));
    assert_eq!(files[0].size.as_deref(), Some("232M"));

    assert_eq!(files[1].name, "Estabelecimentos0.zip");
    assert_eq!(files[1].size.as_deref(), Some("1.1G"));
}

#[tokio::test]
async fn release_without_archives_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2024-05/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><table></table></html>"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert!(client.list_files("2024-05").await.is_err());
}
