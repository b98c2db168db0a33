//! The hosted configurator page, as seen from the backup engine.
//!
//! Everything the engine does to the page goes through [`Page`]: one
//! structural inspection, plus a handful of actions that each consume an
//! [`ElementHandle`] from the latest snapshot.

pub mod dom;
pub mod locator;
pub mod simulated;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use dom::{
    DomBuilder, DomSnapshot, ElementHandle, ElementNode, NodeId, Positioning, Rect, ScrollMetrics, Selector, Viewport,
};
pub use locator::{Confidence, Located, Locator, LocatorChain};
pub use simulated::{DeviceFixture, SimulatedDevice};

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Script failed: {0}")]
    Script(String),

    #[error("Element {node} is stale (generation {held}, page is at {current})")]
    StaleElement { node: NodeId, held: u64, current: u64 },

    #[error("No element matching {0}")]
    NotFound(String),

    #[error("Unsupported action on {node}: {action}")]
    Unsupported { node: NodeId, action: &'static str },
}

pub type PageResult<T> = Result<T, PageError>;

/// Keyboard input replayed into a focused element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
}

impl Key {
    /// One `Char` per character of `text`
    pub fn text(text: &str) -> Vec<Key> {
        text.chars().map(Key::Char).collect()
    }
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Run the inspection script
    async fn inspect(&self) -> PageResult<DomSnapshot>;

    async fn click(&self, target: ElementHandle) -> PageResult<()>;

    /// Set a form control's value and fire its change event
    async fn set_value(&self, target: ElementHandle, value: &str) -> PageResult<()>;

    async fn set_checked(&self, target: ElementHandle, checked: bool) -> PageResult<()>;

    /// Scroll an element; returns the metrics the page settled on
    async fn scroll_to(&self, target: ElementHandle, top: f64) -> PageResult<ScrollMetrics>;

    /// Hide an element, remembering its previous visibility
    async fn hide(&self, target: ElementHandle) -> PageResult<()>;

    /// Undo every `hide`; returns how many elements were restored
    async fn restore_hidden(&self) -> PageResult<usize>;

    async fn send_keys(&self, target: ElementHandle, keys: &[Key]) -> PageResult<()>;

    /// Submit through the console widget's own API; `false` if there is no such widget
    async fn submit_console_command(&self, command: &str) -> PageResult<bool>;

    /// Accumulated console output text
    async fn read_console(&self) -> PageResult<String>;

    async fn clear_console(&self) -> PageResult<()>;
}

#[async_trait]
impl<T: Page + ?Sized> Page for Arc<T> {
    async fn inspect(&self) -> PageResult<DomSnapshot> {
        (**self).inspect().await
    }

    async fn click(&self, target: ElementHandle) -> PageResult<()> {
        (**self).click(target).await
    }

    async fn set_value(&self, target: ElementHandle, value: &str) -> PageResult<()> {
        (**self).set_value(target, value).await
    }

    async fn set_checked(&self, target: ElementHandle, checked: bool) -> PageResult<()> {
        (**self).set_checked(target, checked).await
    }

    async fn scroll_to(&self, target: ElementHandle, top: f64) -> PageResult<ScrollMetrics> {
        (**self).scroll_to(target, top).await
    }

    async fn hide(&self, target: ElementHandle) -> PageResult<()> {
        (**self).hide(target).await
    }

    async fn restore_hidden(&self) -> PageResult<usize> {
        (**self).restore_hidden().await
    }

    async fn send_keys(&self, target: ElementHandle, keys: &[Key]) -> PageResult<()> {
        (**self).send_keys(target, keys).await
    }

    async fn submit_console_command(&self, command: &str) -> PageResult<bool> {
        (**self).submit_console_command(command).await
    }

    async fn read_console(&self) -> PageResult<String> {
        (**self).read_console().await
    }

    async fn clear_console(&self) -> PageResult<()> {
        (**self).clear_console().await
    }
}
