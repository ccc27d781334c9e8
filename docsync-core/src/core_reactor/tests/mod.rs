mod lifecycle_tests;
