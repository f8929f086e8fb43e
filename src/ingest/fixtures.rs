/// Test fixtures: representative payloads for both ingest formats.
///
/// These fixtures are structurally complete but truncated to the minimum
/// needed to exercise the parsers and the balance/leak pipeline.
///
/// Serial line shape (one line per second from the meter firmware):
///   Pulsos: <count> | Vazão: <x.xx> L/min | <x.xxxx> L/s
///
/// CSV log shape (one row per second from the capture script):
///   Timestamp,Pulsos,Vazão (L/min),S1 – Vazão (L/s),...,S4 – Vazão (L/s)
///
/// Note: the S3 header deliberately reproduces the capture script's glued
/// dash ("S3- Vazão (L/s)") — header matching must tolerate it. Pulse
/// counts follow the YF-S201 relation (7.5 pulses/s per L/min).

/// Raw serial capture: boot chatter, three valid samples, one torn line.
#[cfg(test)]
pub(crate) fn fixture_serial_lines() -> &'static str {
    "rst:0x1 (POWERON_RESET),boot:0x13 (SPI_FAST_FLASH_BOOT)\n\
     Sensor inicializado\n\
     Pulsos: 0 | Vazão: 0.00 L/min | 0.0000 L/s\n\
     Pulsos: 42 | Vazão: 1.23 L/min | 0.0205 L/s\n\
     garbage ---\n\
     Pulsos: 90 | Vazão: 12.00 L/min | 0.2000 L/s\n"
}

/// Balanced six-row log: the branch sum tracks the main meter within the
/// watch threshold throughout. No leak detector should fire on this.
#[cfg(test)]
pub(crate) fn fixture_csv_log() -> &'static str {
    "Timestamp,Pulsos,Vazão (L/min),S1 – Vazão (L/s),S2 – Vazão (L/s),S3- Vazão (L/s),S4 – Vazão (L/s)\n\
     2025-11-10 08:00:00,90,12.0,0.08,0.06,0.04,0.02\n\
     2025-11-10 08:00:01,90,12.0,0.08,0.06,0.04,0.02\n\
     2025-11-10 08:00:02,95,12.6,0.08,0.06,0.04,0.02\n\
     2025-11-10 08:00:03,90,12.0,0.08,0.06,0.04,0.02\n\
     2025-11-10 08:00:04,68,9.0,0.08,0.04,0.03,0.0\n\
     2025-11-10 08:00:05,0,0.0,0.0,0.0,0.0,0.0\n"
}

/// Mismatch window: two balanced rows, three rows where the main meter
/// runs ~0.35-0.40 L/s above the branch sum, then one balanced row.
///
/// Expected event: start 08:00:02, end 08:00:04, peak differential
/// 0.40 L/s (the 30 L/min row), ~1.10 L of unexplained volume.
#[cfg(test)]
pub(crate) fn fixture_csv_mismatch_log() -> &'static str {
    "Timestamp,Pulsos,Vazão (L/min),S1 – Vazão (L/s),S2 – Vazão (L/s),S3- Vazão (L/s),S4 – Vazão (L/s)\n\
     2025-11-10 08:00:00,90,12.0,0.08,0.06,0.04,0.02\n\
     2025-11-10 08:00:01,90,12.0,0.08,0.06,0.04,0.02\n\
     2025-11-10 08:00:02,203,27.0,0.05,0.03,0.02,0.0\n\
     2025-11-10 08:00:03,225,30.0,0.05,0.03,0.02,0.0\n\
     2025-11-10 08:00:04,203,27.0,0.05,0.03,0.02,0.0\n\
     2025-11-10 08:00:05,90,12.0,0.08,0.06,0.04,0.02\n"
}

/// Hidden leak: every branch reads zero while the main meter registers
/// 6 L/min (0.1 L/s) for two seconds.
///
/// Expected event: start 08:00:01, end 08:00:02, kind hidden_leak,
/// peak differential 0.1 L/s, ~0.2 L lost.
#[cfg(test)]
pub(crate) fn fixture_csv_hidden_leak_log() -> &'static str {
    "Timestamp,Pulsos,Vazão (L/min),S1 – Vazão (L/s),S2 – Vazão (L/s),S3- Vazão (L/s),S4 – Vazão (L/s)\n\
     2025-11-10 08:00:00,0,0.0,0.0,0.0,0.0,0.0\n\
     2025-11-10 08:00:01,45,6.0,0.0,0.0,0.0,0.0\n\
     2025-11-10 08:00:02,45,6.0,0.0,0.0,0.0,0.0\n\
     2025-11-10 08:00:03,0,0.0,0.0,0.0,0.0,0.0\n"
}

/// Degenerate capture: s2 blank throughout, one torn timestamp, one
/// physically impossible s4 value (99 L/s). Exercises the parser's
/// skip/zero/drop rules.
#[cfg(test)]
pub(crate) fn fixture_csv_sparse_log() -> &'static str {
    "Timestamp,Pulsos,Vazão (L/min),S1 – Vazão (L/s),S2 – Vazão (L/s),S3- Vazão (L/s),S4 – Vazão (L/s)\n\
     2025-11-10 08:00:00,90,12.0,0.08,,0.04,99.0\n\
     2025-11-1,90,12.0,0.08,,0.04,0.02\n\
     2025-11-10 08:00:02,90,12.0,0.08,,0.04,0.02\n"
}
