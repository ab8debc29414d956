mod tests_errors;
mod tests_temporal_api;
