//! `shepherd phases`: list the phase table.

use shepherd::phase::PhaseRegistry;

pub fn cmd_phases() {
    let registry = PhaseRegistry::standard();

    println!();
    println!(
        "{:<16} {:<22} {:<5} {:<6} {:<26} Successors",
        "Phase", "Agent", "Gate", "Limit", "Signals"
    );
    println!(
        "{:<16} {:<22} {:<5} {:<6} {:<26} ----------",
        "-----", "-----", "----", "-----", "-------"
    );
    for phase in registry.iter() {
        let successors = if phase.is_terminal() {
            console::style("(terminal)".to_string()).dim()
        } else {
            console::style(phase.successors.join(", "))
        };
        let limit = phase
            .max_iterations
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:<22} {:<5} {:<6} {:<26} {}",
            phase.name,
            phase.agent,
            if phase.is_gate { "yes" } else { "no" },
            limit,
            phase.allowed_signal_names(),
            successors
        );
    }
    println!();
    println!("New sessions start in '{}'.", registry.initial().name);
}
