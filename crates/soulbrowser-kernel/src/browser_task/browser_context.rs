//! Per-tab binding between a logical browser tab and the CDP session/page
//! that serves it.
//!
//! `resolve_exec_route` used to pick "any session with a focused page",
//! which meant two tabs racing to act could end up sharing (or stealing)
//! the same CDP page. A `BrowserContext` pins one `ExecRoute` to one
//! `TabId`; `BrowserContextRegistry` is the process-wide table of those
//! bindings, enforcing that at most one exists per tab at a time.

use dashmap::DashMap;
use soulbrowser_core_types::ExecRoute;

use super::model::TabId;

/// The route a tab is currently bound to, plus the tab it belongs to.
#[derive(Clone, Debug)]
pub struct BrowserContext {
    tab_id: TabId,
    route: ExecRoute,
}

impl BrowserContext {
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn route(&self) -> &ExecRoute {
        &self.route
    }

    pub fn page(&self) -> &soulbrowser_core_types::PageId {
        &self.route.page
    }
}

/// Registry of one `BrowserContext` per `TabId`.
#[derive(Default)]
pub struct BrowserContextRegistry {
    by_tab: DashMap<TabId, BrowserContext>,
}

impl BrowserContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The route currently bound to `tab_id`, if a `BrowserContext` has been
    /// established for it yet.
    pub fn get_page_for_tab(&self, tab_id: TabId) -> Option<ExecRoute> {
        self.by_tab.get(&tab_id).map(|ctx| ctx.route.clone())
    }

    /// Bind `tab_id` to `route`, replacing any `BrowserContext` it held.
    pub fn switch_tab(&self, tab_id: TabId, route: ExecRoute) -> BrowserContext {
        let ctx = BrowserContext { tab_id, route };
        self.by_tab.insert(tab_id, ctx.clone());
        ctx
    }

    /// The `BrowserContext` for `tab_id`, if any.
    pub fn get_current_page(&self, tab_id: TabId) -> Option<BrowserContext> {
        self.by_tab.get(&tab_id).map(|entry| entry.clone())
    }

    /// Drop the binding for `tab_id`, e.g. when its tab closes.
    pub fn cleanup(&self, tab_id: TabId) {
        self.by_tab.remove(&tab_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soulbrowser_core_types::{FrameId, PageId, SessionId};

    fn route(n: i64) -> ExecRoute {
        ExecRoute::new(
            SessionId(format!("session-{n}")),
            PageId(format!("page-{n}")),
            FrameId(String::new()),
        )
    }

    #[test]
    fn unbound_tab_has_no_context() {
        let registry = BrowserContextRegistry::new();
        assert!(registry.get_page_for_tab(TabId(1)).is_none());
    }

    #[test]
    fn switch_tab_rebinds_the_same_tab() {
        let registry = BrowserContextRegistry::new();
        registry.switch_tab(TabId(1), route(1));
        registry.switch_tab(TabId(1), route(2));
        assert_eq!(registry.get_page_for_tab(TabId(1)).unwrap(), route(2));
    }

    #[test]
    fn cleanup_removes_the_binding() {
        let registry = BrowserContextRegistry::new();
        registry.switch_tab(TabId(1), route(1));
        registry.cleanup(TabId(1));
        assert!(registry.get_page_for_tab(TabId(1)).is_none());
    }
}
