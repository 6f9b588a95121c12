// Round `$val / $lsb` and clamp it into `[0, $max]` as a u32 DAC code
macro_rules! dac_code {
    ($val:expr, $lsb:expr, $max:expr) => {
        match (($val as f64) / ($lsb as f64)).round() {
            c if c < 0.0 => 0u32,
            c if c > ($max as f64) => $max as u32,
            c => c as u32
        }
    };
}

// Dump a sequencer block to the log when `debug_packets` is enabled
macro_rules! seqdbg {
    ($addr:expr, $words:expr) => {
        #[cfg(feature="debug_packets")] {
            let words: &[u32] = $words;
            log::debug!("SEQ @0x{:04x}: {:08x?}", $addr, words);
        }
    };
}
