use std::collections::HashMap;

/// Extract a parameter as usize with a default value
pub fn get_param_usize(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .map(|&v| v.round().max(0.0) as usize)
        .unwrap_or(default)
}

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_param_usize_rounds_and_defaults() {
        let mut params = HashMap::new();
        params.insert("period".to_string(), 13.6);
        assert_eq!(get_param_usize(&params, "period", 5), 14);
        assert_eq!(get_param_usize(&params, "missing", 5), 5);
    }

    #[test]
    fn test_get_param_f64_defaults_when_missing() {
        let mut params = HashMap::new();
        params.insert("threshold".to_string(), 0.02);
        assert_eq!(get_param_f64(&params, "threshold", 0.01), 0.02);
        assert_eq!(get_param_f64(&params, "missing", 0.01), 0.01);
    }
}
