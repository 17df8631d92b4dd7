mod gap_free_test;
mod gate_scenario_test;
