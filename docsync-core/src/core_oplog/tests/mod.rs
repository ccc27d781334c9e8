/*
    Cross-function tests for the operation log engine

    Test suite covering:
    - Two-replica convergence through merge and feedback
    - Undo chains interacting with merges
    - Property tests for garbage collection and merge determinism
*/

pub mod property_tests;
