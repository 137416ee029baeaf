mod tests_cache;
