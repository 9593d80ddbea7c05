//! Freshness ranking of multicast IPTV listings and download detection for
//! the playlists they lead to.

pub mod artifact;
pub mod config;
pub mod error;
pub mod listing;
pub mod pipeline;
pub mod site;
