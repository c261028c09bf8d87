//! Message collation ahead of rendering

use serde::Serialize;

use crate::message::{ImageData, Message, Role, ToolCall};

/// A message after system extraction, image tagging, and same-role merging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollatedMessage {
    pub role: Role,
    pub content: String,
    /// Images stay attached after tagging so templates can still test `.Images`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageData>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// Split out system text and merge consecutive messages of the same role.
///
/// System messages are joined with a blank line. Each image is replaced by an
/// `[img-N]` tag, numbered across the whole conversation: the first `[img]`
/// placeholder in the content takes the tag, otherwise tags are prepended in
/// order.
pub fn collate(messages: &[Message]) -> (String, Vec<CollatedMessage>) {
    let mut system = String::new();
    let mut collated: Vec<CollatedMessage> = Vec::new();
    let mut image_count = 0;

    for msg in messages {
        if msg.role == Role::System {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(&msg.content);
            continue;
        }

        let mut content = msg.content.clone();
        let mut prefix = Vec::new();
        for _ in &msg.images {
            let tag = format!("[img-{}]", image_count);
            if content.contains("[img]") {
                content = content.replacen("[img]", &tag, 1);
            } else {
                prefix.push(tag);
            }
            image_count += 1;
        }
        if !prefix.is_empty() {
            prefix.push(content);
            content = prefix.join(" ").trim().to_string();
        }

        match collated.last_mut() {
            Some(last) if last.role == msg.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&content);
                last.images.extend(msg.images.iter().cloned());
                last.tool_calls.extend(msg.tool_calls.iter().cloned());
            }
            _ => collated.push(CollatedMessage {
                role: msg.role,
                content,
                images: msg.images.clone(),
                tool_calls: msg.tool_calls.clone(),
            }),
        }
    }

    (system, collated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    fn collated(role: Role, content: &str) -> CollatedMessage {
        CollatedMessage {
            role,
            content: content.to_string(),
            images: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    fn image() -> ImageData {
        ImageData(vec![0x89, 0x50])
    }

    #[test]
    fn test_system_messages_extracted() {
        let (system, msgs) = collate(&[
            Message::system("A"),
            Message::system("B"),
            Message::user("Q1"),
            Message::assistant("R1"),
            Message::user("Q2"),
        ]);
        assert_eq!(system, "A\n\nB");
        assert_eq!(
            msgs,
            vec![
                collated(Role::User, "Q1"),
                collated(Role::Assistant, "R1"),
                collated(Role::User, "Q2"),
            ]
        );
    }

    #[test]
    fn test_same_role_merged() {
        let (system, msgs) = collate(&[Message::user("a"), Message::user("b")]);
        assert_eq!(system, "");
        assert_eq!(msgs, vec![collated(Role::User, "a\n\nb")]);
    }

    #[test]
    fn test_merge_across_removed_system_message() {
        let (system, msgs) = collate(&[
            Message::user("a"),
            Message::system("s"),
            Message::user("b"),
        ]);
        assert_eq!(system, "s");
        assert_eq!(msgs, vec![collated(Role::User, "a\n\nb")]);
    }

    #[test]
    fn test_image_tags_prepended_in_order() {
        let (_, msgs) = collate(&[Message::user("what is this?")
            .with_image(image())
            .with_image(image())]);
        assert_eq!(msgs[0].content, "[img-0] [img-1] what is this?");
        assert_eq!(msgs[0].images.len(), 2);
    }

    #[test]
    fn test_images_kept_through_merge() {
        let (_, msgs) = collate(&[
            Message::user("a").with_image(image()),
            Message::user("b").with_image(image()),
        ]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "[img-0] a\n\n[img-1] b");
        assert_eq!(msgs[0].images, vec![image(), image()]);
    }

    #[test]
    fn test_images_omitted_from_bindings_when_empty() {
        let (_, msgs) = collate(&[Message::user("a").with_image(image()), Message::assistant("b")]);
        let value = serde_json::to_value(&msgs).unwrap();
        assert!(value[0].get("images").is_some());
        assert!(value[1].get("images").is_none());
    }

    #[test]
    fn test_image_counter_shared_across_messages() {
        let (_, msgs) = collate(&[
            Message::user("first").with_image(image()),
            Message::assistant("ok"),
            Message::user("second").with_image(image()),
        ]);
        assert_eq!(msgs[0].content, "[img-0] first");
        assert_eq!(msgs[2].content, "[img-1] second");
    }

    #[test]
    fn test_image_placeholder_replaced() {
        let (_, msgs) = collate(&[Message::user("compare [img] with [img]")
            .with_image(image())
            .with_image(image())]);
        assert_eq!(msgs[0].content, "compare [img-0] with [img-1]");
    }

    #[test]
    fn test_image_only_message() {
        let (_, msgs) = collate(&[Message::user("").with_image(image())]);
        assert_eq!(msgs[0].content, "[img-0]");
    }

    #[test]
    fn test_tool_calls_carried_through_merge() {
        let call = ToolCall::new("get_weather", Map::new());
        let (_, msgs) = collate(&[
            Message::assistant("").with_tool_call(call.clone()),
            Message::assistant("done"),
        ]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "\n\ndone");
        assert_eq!(msgs[0].tool_calls, vec![call]);
    }

    #[test]
    fn test_empty_conversation() {
        let (system, msgs) = collate(&[]);
        assert!(system.is_empty());
        assert!(msgs.is_empty());
    }
}
