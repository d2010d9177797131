#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(mut program) = pathsym_ir::load_program(s) {
            let _ = pathsym_guidance::compute_distances(&mut program.locs);
        }
    }
});
