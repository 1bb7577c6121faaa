// Chat transport seam: artifact delivery and status notices.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Who a request is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Requester {
    pub user_id: i64,
    pub chat_id: i64,
}

impl Requester {
    /// Private chat: the chat is the user.
    pub fn direct(user_id: i64) -> Self {
        Self {
            user_id,
            chat_id: user_id,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Upload a local artifact. Returns a token that can redeliver it later.
    async fn deliver(&self, to: &Requester, artifact: &Path) -> Result<String>;

    /// Send a previously uploaded artifact by token.
    async fn redeliver(&self, to: &Requester, token: &str) -> Result<()>;

    /// Best-effort status message.
    async fn notify(&self, to: &Requester, message: &str) -> Result<()>;
}

/// User-facing status and failure notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    AlreadyFetching,
    Fetching,
    Busy,
    Failed,
    RefundInitiated,
}

impl Notice {
    pub fn text(self) -> &'static str {
        match self {
            Notice::AlreadyFetching => {
                "This video is already being downloaded for someone else. Waiting for it to finish..."
            }
            Notice::Fetching => "Downloading the video, please wait...",
            Notice::Busy => "There are a lot of downloads right now. Please try again a bit later.",
            Notice::Failed => "Something went wrong. Please try again later.",
            Notice::RefundInitiated => "A refund of your payment has been initiated.",
        }
    }
}
