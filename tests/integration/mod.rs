//! Integration Tests Module
//!
//! Integration tests for the Inkpad plugin host. Tests cover the wire
//! protocol over real sockets, plugin process supervision, and package
//! installation from a local registry.

// Plugin host socket and execution tests
mod plugin_host_test;

// Package installer tests
mod installer_test;
