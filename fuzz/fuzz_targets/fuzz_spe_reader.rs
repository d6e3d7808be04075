#![no_main]
use libfuzzer_sys::fuzz_target;
use mcb_core::spe::SpeFile;

fuzz_target!(|data: &str| {
    let Ok(file) = SpeFile::parse(data) else {
        return;
    };
    let _ = file.validate_for(file.counts.len());
    let _ = SpeFile::parse(&file.to_spe_string());
});
