#![no_main]
use libfuzzer_sys::fuzz_target;
use pathsym_ir::InstructionKind;
use pathsym_symex::{initial_state, History};
use std::sync::Arc;

// Straight-line reads and writes on whatever program loads.
fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(program) = pathsym_ir::load_program(s) else {
        return;
    };
    let history = History::new();
    let mut state = initial_state(
        Arc::new(program.var_map),
        Arc::new(program.locs),
        &history,
    );
    for _ in 0..64 {
        let instruction = state.get_instruction().clone();
        let ok = match &instruction.kind {
            InstructionKind::Assign { lhs, rhs } => state.write(lhs, rhs).is_ok(),
            InstructionKind::Assume { guard } | InstructionKind::Assert { guard, .. } => {
                state.record_assume(guard).is_ok()
            }
            InstructionKind::EndFunction => false,
            _ => {
                state.record_step();
                true
            }
        };
        if !ok || state.pc().next().loc_number() >= state.locs().len() {
            break;
        }
        state.next_pc();
    }
});
