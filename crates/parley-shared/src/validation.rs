//! Content rules shared by the store and the client.
//!
//! The client runs the same checks before any I/O so a doomed send never
//! reaches the uploader.

use crate::constants::MAX_CONTENT_CHARS;
use crate::error::ValidationError;
use crate::types::{Attachment, UserId};

pub fn char_len(content: &str) -> usize {
    content.chars().count()
}

fn check_length(content: &str) -> Result<(), ValidationError> {
    let len = char_len(content);
    if len > MAX_CONTENT_CHARS {
        return Err(ValidationError::ContentTooLong {
            len,
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(())
}

/// A new message must carry text, an attachment, or both.
pub fn validate_new_message(
    content: &str,
    attachment: Option<&Attachment>,
) -> Result<(), ValidationError> {
    check_length(content)?;
    if let Some(a) = attachment {
        validate_attachment(a)?;
    } else if content.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(())
}

/// Edits replace content only and may never leave it empty, even when the
/// message still carries an attachment.
pub fn validate_edit(content: &str) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::EmptyEdit);
    }
    check_length(content)
}

pub fn validate_participants(sender: &UserId, recipient: &UserId) -> Result<(), ValidationError> {
    if sender.is_empty() || recipient.is_empty() || sender == recipient {
        return Err(ValidationError::InvalidParticipants);
    }
    Ok(())
}

pub fn validate_attachment(attachment: &Attachment) -> Result<(), ValidationError> {
    if attachment.url.trim().is_empty() {
        return Err(ValidationError::InvalidAttachment("missing url".into()));
    }
    if attachment.metadata.file_name.trim().is_empty() {
        return Err(ValidationError::InvalidAttachment("missing file name".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttachmentKind, AttachmentMetadata};

    fn attachment() -> Attachment {
        Attachment {
            url: "http://localhost/objects/alice/1-a.png".into(),
            kind: AttachmentKind::Image,
            metadata: AttachmentMetadata {
                file_name: "a.png".into(),
                file_size: 10,
                mime_type: "image/png".into(),
            },
        }
    }

    #[test]
    fn empty_message_without_attachment_rejected() {
        assert_eq!(
            validate_new_message("", None),
            Err(ValidationError::EmptyMessage)
        );
    }

    #[test]
    fn empty_text_with_attachment_accepted() {
        assert!(validate_new_message("", Some(&attachment())).is_ok());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let exact = "é".repeat(MAX_CONTENT_CHARS);
        assert!(validate_new_message(&exact, None).is_ok());

        let over = "a".repeat(MAX_CONTENT_CHARS + 1);
        assert_eq!(
            validate_new_message(&over, Some(&attachment())),
            Err(ValidationError::ContentTooLong {
                len: MAX_CONTENT_CHARS + 1,
                max: MAX_CONTENT_CHARS
            })
        );
    }

    #[test]
    fn edit_to_empty_rejected() {
        assert_eq!(validate_edit(""), Err(ValidationError::EmptyEdit));
        assert!(validate_edit("fixed typo").is_ok());
    }

    #[test]
    fn participants_must_differ() {
        let a = UserId::from("alice");
        assert!(validate_participants(&a, &"bob".into()).is_ok());
        assert!(validate_participants(&a, &a).is_err());
        assert!(validate_participants(&a, &"  ".into()).is_err());
    }

    #[test]
    fn attachment_without_url_rejected() {
        let mut a = attachment();
        a.url = String::new();
        assert!(matches!(
            validate_new_message("hi", Some(&a)),
            Err(ValidationError::InvalidAttachment(_))
        ));
    }
}
