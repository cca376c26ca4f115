use std::time::Duration;

use mailbox_api::{
    AccessToken, AttachmentFetcher, ContentFetcher, GmailClient, GmailConfig, MailboxError,
    MessageId, MessageLister,
};
use mockito::{Matcher, Server, ServerGuard};
use pretty_assertions::assert_eq;

const TOKEN: &str = "ya29.test-token";
const MESSAGES_PATH: &str = "/gmail/v1/users/me/messages";

fn client(server: &ServerGuard) -> GmailClient {
    let config = GmailConfig {
        base_url: server.url(),
        request_timeout: Duration::from_secs(5),
        ..GmailConfig::default()
    };
    GmailClient::new(&config, AccessToken::new(TOKEN).unwrap()).unwrap()
}

#[tokio::test]
async fn test_list_pages_send_query_and_token() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", MESSAGES_PATH)
        .match_query(Matcher::Exact("q=from%3Aalice%40example.com".to_string()))
        .match_header("authorization", format!("Bearer {TOKEN}").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"messages":[{"id":"16c2","threadId":"t1"},{"id":"41ff9","threadId":"t2"}],"nextPageToken":"next-1","resultSizeEstimate":3}"#,
        )
        .create_async()
        .await;
    let second = server
        .mock("GET", MESSAGES_PATH)
        .match_query(Matcher::Exact(
            "q=from%3Aalice%40example.com&pageToken=next-1".to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"messages":[{"id":"fgbmm","threadId":"t3"}],"resultSizeEstimate":3}"#)
        .create_async()
        .await;

    let client = client(&server);

    let page = client
        .list_first_page("from:alice@example.com")
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 2);
    assert_eq!(page.messages[0].thread_id.as_deref(), Some("t1"));
    assert_eq!(page.next_page(), Some("next-1"));

    let page = client
        .list_next_page("from:alice@example.com", "next-1")
        .await
        .unwrap();
    assert_eq!(page.messages[0].id, MessageId::from("fgbmm"));
    assert_eq!(page.next_page(), None);

    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn test_get_content_requests_full_format() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", format!("{MESSAGES_PATH}/16c2").as_str())
        .match_query(Matcher::UrlEncoded("format".into(), "full".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"id":"16c2","internalDate":"1700000000000","payload":{"mimeType":"multipart/mixed","filename":"","body":{"size":0},"parts":[
                {"partId":"0","mimeType":"text/plain","filename":"","body":{"size":2,"data":"aGk="}},
                {"partId":"1","mimeType":"image/png","filename":"cat.png","body":{"attachmentId":"att-1","size":4}}
            ]}}"#,
        )
        .create_async()
        .await;

    let content = client(&server)
        .get_content(&MessageId::from("16c2"))
        .await
        .unwrap();

    assert_eq!(content.parts.len(), 2);
    assert_eq!(content.parts[1].attachment_name(), Some("cat.png"));
    assert_eq!(content.internal_date.timestamp(), 1_700_000_000);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_get_attachment_payload() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", format!("{MESSAGES_PATH}/16c2/attachments/att-1").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"size":4,"data":"3q2-7w=="}"#)
        .create_async()
        .await;

    let payload = client(&server)
        .get_attachment_payload(&MessageId::from("16c2"), "att-1")
        .await
        .unwrap();

    assert_eq!(payload.data, "3q2-7w==");
    assert_eq!(payload.size, 4);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_statuses_are_mapped() {
    let mut server = Server::new_async().await;
    let _unauthorized = server
        .mock("GET", format!("{MESSAGES_PATH}/denied").as_str())
        .match_query(Matcher::Any)
        .with_status(401)
        .create_async()
        .await;
    let _missing = server
        .mock("GET", format!("{MESSAGES_PATH}/gone").as_str())
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    let _failing = server
        .mock("GET", format!("{MESSAGES_PATH}/broken").as_str())
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("backend unavailable")
        .create_async()
        .await;

    let client = client(&server);

    let err = client.get_content(&MessageId::from("denied")).await.unwrap_err();
    assert!(matches!(err, MailboxError::Unauthorized));

    let err = client.get_content(&MessageId::from("gone")).await.unwrap_err();
    assert!(matches!(err, MailboxError::NotFound(_)));

    let err = client.get_content(&MessageId::from("broken")).await.unwrap_err();
    match err {
        MailboxError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "backend unavailable");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
