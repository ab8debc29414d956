mod tests_selection;
