pub mod helpers;
mod tests_modifiers;
mod tests_optional_union;
