/*
    Integration tests for core_store subsystem

    Test suite covering:
    - Atomic batch commits and write-race detection
    - Sequence queries (since index, since timestamp, conflicting)
    - Time-scoped collection membership and routing lookups
    - Abort handling on read paths
*/

pub mod operation_store_tests;
