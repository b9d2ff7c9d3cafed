//! Access lists checked during login: banned names, banned addresses,
//! and the optional allow-list.
//!
//! `DashSet` gives lock-free-ish concurrent membership checks; lookups
//! are case-insensitive for names.

use std::net::IpAddr;

use dashmap::DashSet;

#[derive(Default)]
pub struct AccessLists {
    banned_names: DashSet<String>,
    banned_addresses: DashSet<IpAddr>,
    allowlist: DashSet<String>,
}

impl AccessLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban_name(&self, name: &str) -> bool {
        self.banned_names.insert(name.to_ascii_lowercase())
    }

    /// Returns true when the name was present and is now removed.
    pub fn unban_name(&self, name: &str) -> bool {
        self.banned_names.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn is_name_banned(&self, name: &str) -> bool {
        self.banned_names.contains(&name.to_ascii_lowercase())
    }

    pub fn ban_address(&self, addr: IpAddr) -> bool {
        self.banned_addresses.insert(addr)
    }

    /// Returns true when the address was present and is now removed.
    pub fn unban_address(&self, addr: IpAddr) -> bool {
        self.banned_addresses.remove(&addr).is_some()
    }

    pub fn is_address_banned(&self, addr: IpAddr) -> bool {
        self.banned_addresses.contains(&addr)
    }

    pub fn allow(&self, name: &str) -> bool {
        self.allowlist.insert(name.to_ascii_lowercase())
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowlist.contains(&name.to_ascii_lowercase())
    }
}
