mod tests_rollback;
