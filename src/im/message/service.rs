//! Message log service
//!
//! Every read and write re-checks that the caller is a connected participant;
//! a relationship may have changed since the conversation was opened.

use std::sync::Arc;

use tracing::{info, warn};

use crate::im::config::ChatConfig;
use crate::im::conversation::service::ConversationService;
use crate::im::error::{ChatError, Result};
use crate::im::feed::{ChangeEvent, ChangeFeed, ChangeOp, FeedFilter, Record, Subscription};
use crate::im::message::dao::{MessageDao, NewMessage};
use crate::im::message::models::{MediaAttachment, Message, MessageCursor, MessageKind};
use crate::im::session::{Identities, Session};
use crate::im::storage::{attachment_path, ObjectStore};

#[derive(Clone)]
pub struct MessageLog {
    config: Arc<ChatConfig>,
    identities: Identities,
    conversations: ConversationService,
    dao: MessageDao,
    store: Arc<dyn ObjectStore>,
    feed: ChangeFeed,
}

impl MessageLog {
    pub fn new(
        config: Arc<ChatConfig>,
        identities: Identities,
        conversations: ConversationService,
        dao: MessageDao,
        store: Arc<dyn ObjectStore>,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            config,
            identities,
            conversations,
            dao,
            store,
            feed,
        }
    }

    /// Append a user message. At least one of `text` or `media` is required;
    /// a media-only message uses the file name as its text.
    pub async fn send(
        &self,
        session: &Session,
        conversation_id: &str,
        text: Option<&str>,
        media: Option<&MediaAttachment>,
    ) -> Result<Message> {
        let content = self.validate_content(text, media)?;

        let sender_id = self.identities.authenticate(session).await?;
        self.conversations
            .authorize(&sender_id, conversation_id)
            .await?;

        let message = self
            .dao
            .append(NewMessage {
                conversation_id,
                sender_id: &sender_id,
                kind: MessageKind::User,
                content: &content,
                media_url: media.map(|m| m.url.as_str()),
            })
            .await?;
        self.publish(&message);
        Ok(message)
    }

    /// Upload a file into the conversation's namespace and send it.
    pub async fn send_attachment(
        &self,
        session: &Session,
        conversation_id: &str,
        caption: Option<&str>,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Message> {
        if bytes.is_empty() {
            return Err(ChatError::Validation("attachment is empty".into()));
        }
        if bytes.len() > self.config.max_upload_bytes {
            return Err(ChatError::Validation(format!(
                "attachment exceeds {} bytes",
                self.config.max_upload_bytes
            )));
        }
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(ChatError::Validation("attachment needs a file name".into()));
        }
        // the stored text is the caption, or the file name without one
        let text = caption.map(str::trim).filter(|c| !c.is_empty()).unwrap_or(filename);
        self.validate_content(Some(text), None)?;

        // Authorize before touching storage so a denied caller leaves no object behind.
        let sender_id = self.identities.authenticate(session).await?;
        self.conversations
            .authorize(&sender_id, conversation_id)
            .await?;

        let media = self
            .store
            .upload(&attachment_path(conversation_id, filename), bytes)
            .await?;
        let attachment = MediaAttachment {
            url: media.url.clone(),
            filename: filename.to_string(),
        };

        match self
            .send(session, conversation_id, caption, Some(&attachment))
            .await
        {
            Ok(message) => Ok(message),
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&media.path).await {
                    warn!("[MessageService] orphaned upload {}: {}", media.path, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Messages after `cursor` (or from the start), ascending log order
    pub async fn list_since(
        &self,
        session: &Session,
        conversation_id: &str,
        cursor: Option<MessageCursor>,
    ) -> Result<Vec<Message>> {
        let user_id = self.identities.authenticate(session).await?;
        self.conversations.authorize(&user_id, conversation_id).await?;
        self.dao.list_since(conversation_id, cursor).await
    }

    /// Append a system message on behalf of `sender_id`. Callers have already
    /// established eligibility.
    pub async fn append_system(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Validation("system message is empty".into()));
        }
        let message = self
            .dao
            .append(NewMessage {
                conversation_id,
                sender_id,
                kind: MessageKind::System,
                content: text,
                media_url: None,
            })
            .await?;
        info!("[MessageService] system message in {}", conversation_id);
        self.publish(&message);
        Ok(message)
    }

    /// Live message and reaction events for one conversation.
    pub async fn subscribe(&self, session: &Session, conversation_id: &str) -> Result<Subscription> {
        let user_id = self.identities.authenticate(session).await?;
        self.conversations.authorize(&user_id, conversation_id).await?;
        Ok(self
            .feed
            .subscribe(FeedFilter::Conversation(conversation_id.to_string())))
    }

    pub async fn get(&self, message_id: &str) -> Result<Option<Message>> {
        self.dao.get(message_id).await
    }

    fn validate_content(&self, text: Option<&str>, media: Option<&MediaAttachment>) -> Result<String> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        let media = media.filter(|m| !m.url.trim().is_empty());

        let content = match (text, media) {
            (Some(text), _) => text.to_string(),
            (None, Some(media)) if !media.filename.trim().is_empty() => {
                media.filename.trim().to_string()
            }
            (None, Some(_)) => "attachment".to_string(),
            (None, None) => {
                return Err(ChatError::Validation(
                    "a message needs text or an attachment".into(),
                ))
            }
        };
        if content.chars().count() > self.config.max_message_chars {
            return Err(ChatError::Validation(format!(
                "message exceeds {} characters",
                self.config.max_message_chars
            )));
        }
        Ok(content)
    }

    fn publish(&self, message: &Message) {
        self.feed.publish(ChangeEvent::new(
            ChangeOp::Insert,
            Record::Message(message.clone()),
        ));
    }
}

#[cfg(test)]
mod tests {
    use crate::im::error::{ChatError, ErrorKind};
    use crate::im::feed::{ChangeOp, Record};
    use crate::im::message::dao::MessageDao;
    use crate::im::message::models::{MediaAttachment, MessageKind};
    use crate::im::session::Session;
    use crate::im::testing::{connect_pair, test_client};

    #[tokio::test]
    async fn empty_and_oversized_messages_are_rejected_before_writing() {
        let client = test_client().await;
        let (a, _, conv) = connect_pair(&client, "ada", "bert").await;
        let dao = MessageDao::new(client.pool().clone());
        let before = dao.count(&conv.id).await.unwrap();

        let err = client
            .messages
            .send(&a, &conv.id, Some("   "), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let long = "x".repeat(client.config.max_message_chars + 1);
        let err = client
            .messages
            .send(&a, &conv.id, Some(&long), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // validation wins over authentication
        let err = client
            .messages
            .send(&Session::anonymous(), &conv.id, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        assert_eq!(dao.count(&conv.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn media_only_message_uses_file_name() {
        let client = test_client().await;
        let (a, _, conv) = connect_pair(&client, "ada", "bert").await;
        let media = MediaAttachment {
            url: "/media/attachments/x/cat.png".into(),
            filename: "cat.png".into(),
        };
        let message = client
            .messages
            .send(&a, &conv.id, None, Some(&media))
            .await
            .unwrap();
        assert_eq!(message.content, "cat.png");
        assert_eq!(message.media_url.as_deref(), Some(media.url.as_str()));
        assert_eq!(message.kind, MessageKind::User);
    }

    #[tokio::test]
    async fn outsider_cannot_send_or_read() {
        let client = test_client().await;
        let (_, _, conv) = connect_pair(&client, "ada", "bert").await;
        let (eve, _) = client.identities.register("eve", "Eve").await.unwrap();
        let dao = MessageDao::new(client.pool().clone());
        let before = dao.count(&conv.id).await.unwrap();

        let err = client
            .messages
            .send(&eve, &conv.id, Some("let me in"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        let err = client
            .messages
            .send(&Session::anonymous(), &conv.id, Some("hi"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthenticated));

        let err = client
            .messages
            .list_since(&eve, &conv.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(dao.count(&conv.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn appends_are_listed_in_order_and_broadcast() {
        let client = test_client().await;
        let (a, b, conv) = connect_pair(&client, "ada", "bert").await;
        let mut sub = client.messages.subscribe(&b, &conv.id).await.unwrap();

        for text in ["t1", "t2", "t3"] {
            client
                .messages
                .send(&a, &conv.id, Some(text), None)
                .await
                .unwrap();
        }

        let all = client.messages.list_since(&b, &conv.id, None).await.unwrap();
        let texts: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts[0], client.config.welcome_message);
        assert_eq!(&texts[1..], ["t1", "t2", "t3"]);

        let tail = client
            .messages
            .list_since(&b, &conv.id, Some(all[1].cursor()))
            .await
            .unwrap();
        assert_eq!(tail.len(), 2);

        for expected in ["t1", "t2", "t3"] {
            let event = sub.try_next().expect("event published");
            assert_eq!(event.op, ChangeOp::Insert);
            match event.record {
                Record::Message(m) => assert_eq!(m.content, expected),
                other => panic!("unexpected record {other:?}"),
            }
        }
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn attachment_is_stored_under_the_conversation() {
        let client = test_client().await;
        let (a, _, conv) = connect_pair(&client, "ada", "bert").await;

        let message = client
            .messages
            .send_attachment(&a, &conv.id, Some("look"), "photo.jpg", b"jpegbytes")
            .await
            .unwrap();
        assert_eq!(message.content, "look");
        let url = message.media_url.unwrap();
        assert!(url.contains(&format!("attachments/{}/", conv.id)));
        assert!(url.ends_with("-photo.jpg"));

        let too_big = vec![0u8; client.config.max_upload_bytes + 1];
        let err = client
            .messages
            .send_attachment(&a, &conv.id, None, "big.bin", &too_big)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn overlong_caption_is_rejected_before_upload() {
        let client = test_client().await;
        let (a, _, conv) = connect_pair(&client, "ada", "bert").await;

        let caption = "x".repeat(client.config.max_message_chars + 1);
        let err = client
            .messages
            .send_attachment(&a, &conv.id, Some(&caption), "photo.jpg", b"jpegbytes")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let long_name = format!("{}.txt", "n".repeat(client.config.max_message_chars));
        let err = client
            .messages
            .send_attachment(&a, &conv.id, None, &long_name, b"text")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let attachments = client.config.media_root.join("attachments").join(&conv.id);
        assert!(!attachments.exists());
    }

    #[tokio::test]
    async fn system_messages_are_appended_and_broadcast() {
        let client = test_client().await;
        let (_, b, conv) = connect_pair(&client, "ada", "bert").await;
        let mut sub = client.messages.subscribe(&b, &conv.id).await.unwrap();

        let notice = client
            .messages
            .append_system(&conv.id, &b.user_id, "  bert changed their name  ")
            .await
            .unwrap();
        assert_eq!(notice.kind, MessageKind::System);
        assert_eq!(notice.content, "bert changed their name");
        assert_eq!(sub.try_next().unwrap().record, Record::Message(notice));

        let err = client
            .messages
            .append_system(&conv.id, &b.user_id, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
}
