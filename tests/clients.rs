use chrono::{TimeZone, Utc};
use rstest::*;
use serde_json::json;
use visearch::pipeline::{FetchError, HttpImageFetcher, ImageFetcher};
use visearch::rewrite::{ChatClient, QueryRewriter, RewriteError};
use visearch::search_index::{SearchIndexClient, VectorIndex};
use visearch::storage::{
    BlobCredentials, BlobLocator, CredentialError, CredentialMinter, DELEGATION_VALIDITY,
    ManagedIdentity,
};
use visearch::types::IndexDocument;
use visearch::vision::{EmbedError, Embedder, VisionClient};
use wiremock::matchers::{body_json, body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DELEGATION_KEY: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
    <UserDelegationKey>\
        <SignedOid>oid</SignedOid>\
        <SignedTid>tid</SignedTid>\
        <SignedStart>2024-06-01T12:00:00Z</SignedStart>\
        <SignedExpiry>2024-06-02T12:00:00Z</SignedExpiry>\
        <SignedService>b</SignedService>\
        <SignedVersion>2024-08-04</SignedVersion>\
        <Value>a2V5</Value>\
    </UserDelegationKey>";

#[fixture]
fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[rstest]
#[tokio::test]
async fn vision_embeds_image_with_signed_url(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/computervision/retrieval:vectorizeImage"))
        .and(query_param("api-version", "2023-02-01-preview"))
        .and(header("Ocp-Apim-Subscription-Key", "vision-key"))
        .and(body_string_contains("https://acct.blob.core.windows.net/c/img.png?sp=r"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vector": [0.1, 0.2, 0.3]})))
        .expect(1)
        .mount(&server)
        .await;

    let vision = VisionClient::new(client, server.uri(), "vision-key", "2023-02-01-preview");
    let locator = BlobLocator::parse("https://acct.blob.core.windows.net/c/img.png").unwrap();
    let credential = BlobCredentials::account_key("a2V5").unwrap().mint(&locator, None).await.unwrap();

    let vector = vision.embed_image(locator.url(), &credential).await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
}

#[rstest]
#[tokio::test]
async fn vision_text_failure_is_an_error(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/computervision/retrieval:vectorizeText"))
        .and(body_json(json!({"text": "cats"})))
        .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
        .mount(&server)
        .await;

    let vision = VisionClient::new(client, server.uri(), "vision-key", "2023-02-01-preview");
    let err = vision.embed_text("cats").await.unwrap_err();
    assert!(matches!(err, EmbedError::Status { status: 401, .. }));
}

#[rstest]
#[tokio::test]
async fn chat_returns_first_choice_verbatim(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .and(query_param("api-version", "2024-02-01"))
        .and(header("api-key", "llm-key"))
        .and(body_partial_json(json!({"model": "gpt-4o", "max_tokens": 200})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [
                {"message": {"role": "assistant", "content": " person using laptop "}},
                {"message": {"role": "assistant", "content": "ignored"}},
            ]
        })))
        .mount(&server)
        .await;

    let chat = ChatClient::new(client, server.uri(), "llm-key", "gpt-4o", "2024-02-01");
    assert_eq!(chat.rewrite("woman with computer").await.unwrap(), " person using laptop ");
}

#[rstest]
#[tokio::test]
async fn chat_without_choices_is_an_error(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let chat = ChatClient::new(client, server.uri(), "llm-key", "gpt-4o", "2024-02-01");
    assert!(matches!(chat.rewrite("cats").await, Err(RewriteError::EmptyCompletion)));
}

#[rstest]
#[tokio::test]
async fn search_sends_vector_query(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/images/docs/search"))
        .and(query_param("api-version", "2023-11-01"))
        .and(header("api-key", "search-key"))
        .and(body_partial_json(json!({
            "vectorQueries": [{"kind": "vector", "vector": [0.5, 0.5], "k": 3, "fields": "imageVector"}],
            "select": "title,imageUrl",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"@search.score": 0.9, "title": "a.png", "imageUrl": "https://acct.blob.core.windows.net/c/a.png"},
                {"@search.score": 0.7, "title": "b.png", "imageUrl": "https://acct.blob.core.windows.net/c/b.png"},
            ]
        })))
        .mount(&server)
        .await;

    let index = SearchIndexClient::new(client, server.uri(), "images", "search-key", "2023-11-01");
    let results = index.search(&[0.5, 0.5], 3).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title, "a.png");
    assert_eq!(results[0].score, 0.9);
    assert_eq!(
        serde_json::to_value(&results[1]).unwrap(),
        json!({"Title": "b.png", "Image URL": "https://acct.blob.core.windows.net/c/b.png", "Score": 0.7})
    );
}

#[rstest]
#[tokio::test]
async fn upsert_merges_documents(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/images/docs/index"))
        .and(body_partial_json(json!({"value": [{"@search.action": "mergeOrUpload", "id": "k1"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"key": "k1", "status": true, "errorMessage": null, "statusCode": 201}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let index = SearchIndexClient::new(client, server.uri(), "images", "search-key", "2023-11-01");
    let document = IndexDocument {
        id: "k1".into(),
        image_url: "https://acct.blob.core.windows.net/c/a.png".into(),
        image_vector: vec![1.0],
        title: "a.png".into(),
    };
    let result = index.upsert(&[document]).await.unwrap();
    assert!(result.first_failure().is_none());
}

#[rstest]
#[tokio::test]
async fn delegation_uses_forwarded_authorization(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/acct/"))
        .and(query_param("restype", "service"))
        .and(query_param("comp", "userdelegationkey"))
        .and(header("Authorization", "Bearer caller"))
        .and(body_string_contains("<Start>2024-06-01T12:00:00Z</Start>"))
        .and(body_string_contains("<Expiry>2024-06-02T12:00:00Z</Expiry>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DELEGATION_KEY))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = BlobCredentials::delegation(client, None);
    let locator = BlobLocator::parse(&format!("{}/acct/c/img.png", server.uri())).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    let credential = credentials.mint_at(&locator, Some("Bearer caller"), now).await.unwrap();

    assert_eq!(credential.expiry() - credential.start(), DELEGATION_VALIDITY);
    let query = credential.signed_parameters();
    assert!(query.contains("skoid=oid"));
    assert!(query.contains("se=2024-06-02T12%3A00%3A00Z"));
    assert!(query.contains("sig="));
}

#[rstest]
#[tokio::test]
async fn delegation_falls_back_to_managed_identity(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("resource", "https://storage.azure.com/"))
        .and(query_param("api-version", "2019-08-01"))
        .and(header("X-IDENTITY-HEADER", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "mi-token"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/acct/"))
        .and(header("Authorization", "Bearer mi-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DELEGATION_KEY))
        .expect(1)
        .mount(&server)
        .await;

    let identity = ManagedIdentity::new(format!("{}/token", server.uri()), Some("secret".into()));
    let credentials = BlobCredentials::delegation(client, Some(identity));
    let locator = BlobLocator::parse(&format!("{}/acct/c/img.png", server.uri())).unwrap();

    assert!(credentials.mint(&locator, None).await.is_ok());
}

#[rstest]
#[tokio::test]
async fn delegation_rejection_is_a_credential_error(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("AuthorizationFailure"))
        .mount(&server)
        .await;

    let credentials = BlobCredentials::delegation(client, None);
    let locator = BlobLocator::parse(&format!("{}/acct/c/img.png", server.uri())).unwrap();

    let err = credentials.mint(&locator, Some("Bearer caller")).await.unwrap_err();
    assert!(matches!(err, CredentialError::DelegationStatus { status: 403, .. }));
}

#[rstest]
#[tokio::test]
async fn fetcher_downloads_signed_blob(client: reqwest::Client) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/acct/c/img.png"))
        .and(query_param("sp", "r"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
        .mount(&server)
        .await;

    let fetcher = HttpImageFetcher::new(client);
    let bytes = fetcher.fetch(&format!("{}/acct/c/img.png?sp=r", server.uri()), None).await.unwrap();
    assert_eq!(bytes, b"png");

    let err = fetcher.fetch(&format!("{}/acct/c/missing.png", server.uri()), None).await.unwrap_err();
    assert!(matches!(err, FetchError::Status(404)));
}
