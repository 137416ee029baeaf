mod tests_basic;
mod tests_distribution;
mod tests_params;
mod tests_variants;
