use std::path::Path;

/// Extract the file name from a workflow path such as
/// `.github/workflows/build.yml`.
pub fn extract_workflow_file_name(workflow_path: &str) -> String {
    Path::new(workflow_path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| workflow_path.to_string())
}

/// Compare two dotted version strings numerically, component by component.
///
/// Missing trailing components count as lower, so `25.1` < `25.1.4`.
pub fn is_version_greater_or_equal(version1: &str, version2: &str) -> bool {
    if version1.is_empty() || version2.is_empty() {
        return false;
    }

    let parts1: Vec<&str> = version1.split('.').collect();
    let parts2: Vec<&str> = version2.split('.').collect();

    for (part1, part2) in parts1.iter().zip(parts2.iter()) {
        let number1 = part1.parse::<u64>().unwrap_or(0);
        let number2 = part2.parse::<u64>().unwrap_or(0);
        if number1 != number2 {
            return number1 > number2;
        }
    }

    parts1.len() >= parts2.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_workflow_file_name() {
        assert_eq!(
            extract_workflow_file_name(".github/workflows/build.yml"),
            "build.yml"
        );
        assert_eq!(extract_workflow_file_name("build.yml"), "build.yml");
    }

    #[test]
    fn test_version_comparison() {
        assert!(is_version_greater_or_equal("25.1.4", "25.1.4"));
        assert!(is_version_greater_or_equal("25.2.0", "25.1.4"));
        assert!(is_version_greater_or_equal("26.1", "25.9.9"));
        assert!(!is_version_greater_or_equal("25.1.3", "25.1.4"));
        assert!(!is_version_greater_or_equal("25.1", "25.1.4"));
        assert!(!is_version_greater_or_equal("", "25.1.4"));
        assert!(!is_version_greater_or_equal("25.1.4", ""));
    }
}
