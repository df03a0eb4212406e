//! Menu Registry
//!
//! In-memory registry of menu items contributed by plugins. One registry is
//! constructed per plugin manager and shared through `Arc`; nothing is
//! persisted, items live exactly as long as their owning plugin is connected
//! or installed.
//!
//! Listeners are notified synchronously, and only when the item list actually
//! changed.

use std::sync::RwLock;

use inkpad_core::MenuItem;

use crate::services::plugins::subscribers::{ListenerId, Subscribers};

/// Registry of plugin-contributed menu items.
#[derive(Debug, Default)]
pub struct MenuRegistry {
    /// Items in insertion order
    items: RwLock<Vec<MenuItem>>,
    listeners: Subscribers<[MenuItem]>,
}

impl MenuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item, replacing any existing item with the same id in place.
    pub fn register_menu_item(&self, item: MenuItem) {
        let snapshot = {
            let Ok(mut items) = self.items.write() else {
                return;
            };
            match items.iter_mut().find(|existing| existing.id == item.id) {
                Some(existing) if *existing == item => return,
                Some(existing) => *existing = item,
                None => items.push(item),
            }
            items.clone()
        };
        self.listeners.notify(&snapshot);
    }

    /// Remove every item owned by `plugin_id`.
    ///
    /// Returns the number of removed items; listeners fire only if it is non-zero.
    pub fn unregister_menu_items_by_plugin(&self, plugin_id: &str) -> usize {
        let (removed, snapshot) = {
            let Ok(mut items) = self.items.write() else {
                return 0;
            };
            let before = items.len();
            items.retain(|item| item.plugin_id != plugin_id);
            (before - items.len(), items.clone())
        };
        if removed > 0 {
            tracing::debug!(plugin = %plugin_id, removed, "Removed plugin menu items");
            self.listeners.notify(&snapshot);
        }
        removed
    }

    /// Replace the whole contribution set of `plugin_id` with `new_items`.
    ///
    /// Each item's `plugin_id` is forced to the owner. Items whose id is
    /// already taken by another plugin replace that item. One notification at
    /// most.
    pub fn replace_plugin_items(&self, plugin_id: &str, new_items: Vec<MenuItem>) {
        let snapshot = {
            let Ok(mut items) = self.items.write() else {
                return;
            };
            let before = items.clone();
            items.retain(|item| item.plugin_id != plugin_id);
            for mut item in new_items {
                item.plugin_id = plugin_id.to_string();
                match items.iter_mut().find(|existing| existing.id == item.id) {
                    Some(existing) => *existing = item,
                    None => items.push(item),
                }
            }
            if *items == before {
                return;
            }
            items.clone()
        };
        self.listeners.notify(&snapshot);
    }

    /// Items attached to `parent_menu` (case-insensitive), ordered by position.
    ///
    /// The sort is stable, so items with equal positions keep insertion order.
    pub fn get_menu_items_for_parent(&self, parent_menu: &str) -> Vec<MenuItem> {
        let Ok(items) = self.items.read() else {
            return Vec::new();
        };
        let mut matching: Vec<MenuItem> = items
            .iter()
            .filter(|item| item.parent_menu.eq_ignore_ascii_case(parent_menu))
            .cloned()
            .collect();
        matching.sort_by_key(MenuItem::effective_position);
        matching
    }

    pub fn get_menu_item(&self, id: &str) -> Option<MenuItem> {
        self.items
            .read()
            .ok()
            .and_then(|items| items.iter().find(|item| item.id == id).cloned())
    }

    pub fn all_items(&self) -> Vec<MenuItem> {
        self.items.read().map(|items| items.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[MenuItem]) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
