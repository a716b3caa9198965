//! Host platform queries.

/// DNS domain of the signed-in Windows user, if the session is domain-joined.
pub fn domain_name() -> Option<String> {
    if !cfg!(windows) {
        return None;
    }
    std::env::var("USERDNSDOMAIN")
        .ok()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(windows))]
    fn test_no_domain_outside_windows() {
        assert!(domain_name().is_none());
    }
}
