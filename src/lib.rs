//! Topology stage of a Garmin IMG map compiler.
//!
//! A tile's styled elements go through three engines before they are
//! written: multipolygons are cut into hole-free polygons
//! ([`element_processing::area_cutter`]), polygons of the same kind that
//! share edges are merged ([`element_processing::shape_merge`]) and roads
//! that double each other are cleaned up
//! ([`element_processing::overlap_remover`]).
//! [`tile_processing`] runs them in order for every tile.

pub mod args;
pub mod bbox;
pub mod clipping;
pub mod config;
pub mod coord;
pub mod debug_logging;
pub mod element_processing;
pub mod geometry;
pub mod logging;
pub mod map_element;
pub mod tile_data;
pub mod tile_processing;
