//! Directory history with a cursor.

use dualstore_core::paths::normalize_path;

/// Why a load was issued; decides how a successful result moves history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadIntent {
    /// Fresh session: history is reseeded
    Open,
    Push,
    Back,
    Forward,
    Reload,
}

/// Linear navigation history.
///
/// Mutated only through [`commit`](Self::commit), which the controller
/// calls when a load succeeds; failed loads leave it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationState {
    history: Vec<String>,
    cursor: usize,
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Displayed path; `None` before the first successful load.
    pub fn current(&self) -> Option<&str> {
        self.history.get(self.cursor).map(String::as_str)
    }

    pub fn can_go_back(&self) -> bool {
        !self.history.is_empty() && self.cursor > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.cursor + 1 < self.history.len()
    }

    pub fn back_target(&self) -> Option<&str> {
        if self.can_go_back() {
            self.history.get(self.cursor - 1).map(String::as_str)
        } else {
            None
        }
    }

    pub fn forward_target(&self) -> Option<&str> {
        if self.can_go_forward() {
            self.history.get(self.cursor + 1).map(String::as_str)
        } else {
            None
        }
    }

    /// Reset history to a single path.
    pub fn seed(&mut self, path: &str) {
        self.history = vec![normalize_path(path)];
        self.cursor = 0;
    }

    /// Record a successful load of `path` issued with `intent`.
    pub fn commit(&mut self, intent: LoadIntent, path: &str) {
        if self.history.is_empty() {
            self.seed(path);
            return;
        }
        match intent {
            LoadIntent::Open => self.seed(path),
            LoadIntent::Push => {
                self.history.truncate(self.cursor + 1);
                self.history.push(normalize_path(path));
                self.cursor = self.history.len() - 1;
            }
            LoadIntent::Back => self.cursor = self.cursor.saturating_sub(1),
            LoadIntent::Forward => {
                if self.can_go_forward() {
                    self.cursor += 1;
                }
            }
            LoadIntent::Reload => {}
        }
    }
}
