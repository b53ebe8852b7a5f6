//! Parsers, protocol clients, normalization and the sync engine

pub mod epg;
pub mod fetcher;
pub mod http;
pub mod json_stream;
pub mod lenient;
pub mod m3u_parser;
pub mod normalizer;
pub mod records;
pub mod scheduler;
pub mod stalker;
pub mod sync;
pub mod xmltv;
pub mod xtream;
