mod tests_ordering;
mod tests_roundtrip;
