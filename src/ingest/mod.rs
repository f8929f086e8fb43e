/// Data ingestion: one submodule per source format.
///
/// - `serial` — ESP32 main-meter line protocol over USB serial.
/// - `csvlog` — multi-channel CSV log written by the capture script
///   (live tail and historical backfill share the same parser).
/// - `fixtures` (test only) — representative payloads for both formats.

pub mod csvlog;
pub mod fixtures;
pub mod serial;
