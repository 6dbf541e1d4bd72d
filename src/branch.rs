use crate::protocol::BranchMeta;
use crate::reconcile::Message;

/// Where the next sent message attaches in the conversation tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Attach {
    /// Continue the active branch.
    #[default]
    Tip,
    /// Fork after this message, replacing everything that followed it.
    After(String),
    /// Start a new root-level branch.
    Root,
}

impl Attach {
    /// Attach point for editing-and-resending `messages[index]`.
    pub fn for_edit(messages: &[Message], index: usize) -> Option<Self> {
        if index >= messages.len() {
            return None;
        }
        Some(match index.checked_sub(1) {
            Some(prev) => Self::After(messages[prev].id.clone()),
            None => Self::Root,
        })
    }

    /// Reshapes the visible list so a new message can be appended.
    pub fn truncate(&self, visible: &mut Vec<Message>) {
        match self {
            Self::Tip => {}
            Self::Root => visible.clear(),
            Self::After(id) => match visible.iter().position(|message| &message.id == id) {
                Some(index) => visible.truncate(index + 1),
                None => tracing::warn!(%id, "fork point not visible, appending at tip"),
            },
        }
    }

    /// `(prev_message_id, branch_from_root)` for the chat request.
    pub fn request_fields(&self) -> (Option<String>, bool) {
        match self {
            Self::Tip => (None, false),
            Self::After(id) => (Some(id.clone()), false),
            Self::Root => (None, true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    fn action(self) -> &'static str {
        match self {
            Self::Left => "switch-left",
            Self::Right => "switch-right",
        }
    }
}

/// REST path that makes the sibling in `direction` the active branch.
pub fn switch_path(direction: Direction, conversation_id: &str, message_id: &str) -> String {
    format!(
        "/api/conversations/{conversation_id}/messages/{message_id}/{}",
        direction.action()
    )
}

/// Position of a message among its siblings. Missing metadata reads as
/// "only child".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingPosition {
    pub index: u32,
    pub total: u32,
    pub can_left: bool,
    pub can_right: bool,
}

impl SiblingPosition {
    pub fn has_siblings(&self) -> bool {
        self.total > 1 || self.can_left || self.can_right
    }

    pub fn can_move(&self, direction: Direction) -> bool {
        match direction {
            Direction::Left => self.can_left,
            Direction::Right => self.can_right,
        }
    }
}

impl From<&BranchMeta> for SiblingPosition {
    fn from(meta: &BranchMeta) -> Self {
        let total = meta.sibling_total.unwrap_or(1).max(1);
        Self {
            index: meta.sibling_index.unwrap_or(1).clamp(1, total),
            total,
            can_left: meta.can_left.unwrap_or(false),
            can_right: meta.can_right.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn visible() -> Vec<Message> {
        vec![
            Message::user("u1", "first"),
            Message::assistant("a1", "reply", Vec::new()),
            Message::user("u2", "second"),
            Message::assistant("a2", "reply 2", Vec::new()),
        ]
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|message| message.id.as_str()).collect()
    }

    #[test]
    fn editing_first_message_forks_from_root() {
        let messages = visible();
        let attach = Attach::for_edit(&messages, 0).unwrap();
        assert_eq!(attach, Attach::Root);
        assert_eq!(attach.request_fields(), (None, true));

        let mut messages = messages;
        attach.truncate(&mut messages);
        assert!(messages.is_empty());
    }

    #[test]
    fn editing_later_message_forks_after_predecessor() {
        let mut messages = visible();
        let attach = Attach::for_edit(&messages, 2).unwrap();
        assert_eq!(attach, Attach::After("a1".to_string()));
        assert_eq!(attach.request_fields(), (Some("a1".to_string()), false));

        attach.truncate(&mut messages);
        assert_eq!(ids(&messages), vec!["u1", "a1"]);
    }

    #[test]
    fn out_of_range_edit_is_rejected() {
        assert_eq!(Attach::for_edit(&visible(), 4), None);
    }

    #[test]
    fn unknown_fork_point_leaves_list_alone() {
        let mut messages = visible();
        Attach::After("gone".to_string()).truncate(&mut messages);
        assert_eq!(messages.len(), 4);
        Attach::Tip.truncate(&mut messages);
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn switch_paths() {
        assert_eq!(
            switch_path(Direction::Left, "c1", "m2"),
            "/api/conversations/c1/messages/m2/switch-left"
        );
        assert_eq!(
            switch_path(Direction::Right, "c1", "m2"),
            "/api/conversations/c1/messages/m2/switch-right"
        );
    }

    #[test]
    fn missing_metadata_means_single_child() {
        let position = SiblingPosition::from(&BranchMeta::default());
        assert_eq!(
            position,
            SiblingPosition {
                index: 1,
                total: 1,
                can_left: false,
                can_right: false,
            }
        );
        assert!(!position.has_siblings());
    }

    #[test]
    fn sibling_position_reads_metadata() {
        let position = SiblingPosition::from(&BranchMeta {
            can_left: Some(true),
            can_right: None,
            sibling_index: Some(3),
            sibling_total: Some(3),
        });
        assert!(position.has_siblings());
        assert!(position.can_move(Direction::Left));
        assert!(!position.can_move(Direction::Right));
        assert_eq!((position.index, position.total), (3, 3));
    }
}
