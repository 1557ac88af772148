//! # PageRouter - Centralized Navigation
//!
//! Provides page navigation with history support for the two pages of the
//! voice chat: the welcome page (model and role selection) and the chat.
//!
//! ## Features
//! - Navigation history with back support
//! - Returns pages to hide so the caller can stop their timers
//! - Session gate: the chat is unreachable until a session has started

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    #[default]
    Welcome,
    Chat,
}

impl Page {
    pub const ALL: [Page; 2] = [Page::Welcome, Page::Chat];
}

/// Centralized page navigation manager
///
/// Tracks current page and navigation history, returns pages that need
/// to be hidden when navigating.
#[derive(Clone, Debug)]
pub struct PageRouter {
    /// Currently visible page
    current_page: Page,
    /// Navigation history stack
    page_stack: Vec<Page>,
    /// All registered pages (for calculating pages_to_hide)
    all_pages: Vec<Page>,
}

impl Default for PageRouter {
    fn default() -> Self {
        Self::with_pages(Page::Welcome, Page::ALL.to_vec())
    }
}

impl PageRouter {
    /// Router on the welcome page with both pages registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router with initial page and all available pages
    pub fn with_pages(initial_page: Page, all_pages: Vec<Page>) -> Self {
        Self {
            current_page: initial_page,
            page_stack: vec![initial_page],
            all_pages,
        }
    }

    /// Set the initial page (without adding to history)
    pub fn set_initial_page(&mut self, page: Page) {
        self.current_page = page;
        self.page_stack.clear();
        self.page_stack.push(page);
    }

    /// Navigate to a new page
    ///
    /// Returns the list of pages that should be hidden.
    pub fn navigate_to(&mut self, page: Page) -> Vec<Page> {
        if self.current_page == page {
            return Vec::new();
        }

        let pages_to_hide = self.pages_to_hide(page);
        self.page_stack.push(page);
        self.current_page = page;
        log::debug!("PageRouter: -> {:?}", page);
        pages_to_hide
    }

    /// Navigate back to the previous page
    ///
    /// Returns Some(previous_page, pages_to_hide) if there's history,
    /// or None if at the root.
    pub fn navigate_back(&mut self) -> Option<(Page, Vec<Page>)> {
        if self.page_stack.len() <= 1 {
            return None;
        }

        self.page_stack.pop();
        let previous = *self.page_stack.last()?;
        let pages_to_hide = self.pages_to_hide(previous);
        self.current_page = previous;
        Some((previous, pages_to_hide))
    }

    /// Force the welcome page while no session is started.
    ///
    /// Returns the pages to hide if the router had to move.
    pub fn gate(&mut self, started: bool) -> Option<Vec<Page>> {
        if started || self.current_page == Page::Welcome {
            return None;
        }
        log::info!("PageRouter: no session, returning to welcome");
        let hidden = self.pages_to_hide(Page::Welcome);
        self.set_initial_page(Page::Welcome);
        Some(hidden)
    }

    /// Get pages that should be hidden when navigating to a new page
    pub fn pages_to_hide(&self, new_page: Page) -> Vec<Page> {
        self.all_pages
            .iter()
            .filter(|&&p| p != new_page)
            .copied()
            .collect()
    }

    pub fn current_page(&self) -> Page {
        self.current_page
    }

    pub fn can_go_back(&self) -> bool {
        self.page_stack.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation() {
        let mut router = PageRouter::new();

        assert_eq!(router.current_page(), Page::Welcome);
        assert!(!router.can_go_back());

        let hidden = router.navigate_to(Page::Chat);
        assert_eq!(router.current_page(), Page::Chat);
        assert_eq!(hidden, vec![Page::Welcome]);
        assert!(router.can_go_back());

        let (prev, hidden) = router.navigate_back().unwrap();
        assert_eq!(prev, Page::Welcome);
        assert_eq!(hidden, vec![Page::Chat]);
        assert!(router.navigate_back().is_none());
    }

    #[test]
    fn test_same_page_navigation() {
        let mut router = PageRouter::new();
        let hidden = router.navigate_to(Page::Welcome);
        assert!(hidden.is_empty());
        assert!(!router.can_go_back());
    }

    #[test]
    fn test_gate_without_session() {
        let mut router = PageRouter::new();
        router.navigate_to(Page::Chat);

        assert_eq!(router.gate(true), None);
        assert_eq!(router.current_page(), Page::Chat);

        assert_eq!(router.gate(false), Some(vec![Page::Chat]));
        assert_eq!(router.current_page(), Page::Welcome);
        assert!(!router.can_go_back());
        assert_eq!(router.gate(false), None);
    }

    #[test]
    fn test_single_page_router() {
        let mut router = PageRouter::with_pages(Page::Welcome, vec![Page::Welcome]);
        assert_eq!(router.navigate_to(Page::Chat), vec![Page::Welcome]);
        assert_eq!(router.current_page(), Page::Chat);
        assert!(router.pages_to_hide(Page::Welcome).is_empty());
    }
}
