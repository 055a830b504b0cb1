//! Priority-ordered profile matching.
//!
//! Profiles compile into a flat list of testers sorted by ascending
//! priority; the first hit wins. Disabled profiles and profiles with an
//! invalid regex are dropped at build time.

use globset::GlobBuilder;
use regex::Regex;

use crate::config::Profile;

enum Tester {
    Glob(globset::GlobMatcher),
    Regex(Regex),
}

impl Tester {
    fn matches(&self, basename: &str) -> bool {
        match self {
            Tester::Glob(glob) => glob.is_match(basename),
            Tester::Regex(re) => re.is_match(basename),
        }
    }
}

struct CompiledProfile {
    profile: Profile,
    tester: Tester,
}

/// First-match-wins matcher over the enabled profiles.
pub struct ProfileMatcher {
    entries: Vec<CompiledProfile>,
}

impl ProfileMatcher {
    /// Compile the enabled profiles, stable-sorted by ascending priority.
    pub fn new(profiles: &[Profile]) -> Self {
        let mut enabled: Vec<&Profile> = profiles.iter().filter(|p| p.enabled).collect();
        enabled.sort_by_key(|p| p.priority);

        let mut entries = Vec::with_capacity(enabled.len());
        for profile in enabled {
            let tester = if profile.is_regex {
                match Regex::new(&profile.pattern) {
                    Ok(re) => Tester::Regex(re),
                    Err(e) => {
                        crate::debug_event!(
                            "matcher",
                            "dropped invalid regex",
                            "{}: {e}",
                            profile.id
                        );
                        continue;
                    }
                }
            } else {
                match GlobBuilder::new(&profile.pattern).case_insensitive(true).build() {
                    Ok(glob) => Tester::Glob(glob.compile_matcher()),
                    Err(e) => {
                        crate::debug_event!(
                            "matcher",
                            "dropped invalid glob",
                            "{}: {e}",
                            profile.id
                        );
                        continue;
                    }
                }
            };
            entries.push(CompiledProfile {
                profile: profile.clone(),
                tester,
            });
        }
        Self { entries }
    }

    /// First enabled profile whose pattern matches. Dotfiles never match.
    pub fn match_basename(&self, basename: &str) -> Option<&Profile> {
        if basename.starts_with('.') {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.tester.matches(basename))
            .map(|entry| &entry.profile)
    }

    /// Whether any profile would claim `basename`.
    pub fn test(&self, basename: &str) -> bool {
        self.match_basename(basename).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, pattern: &str, priority: i32) -> Profile {
        Profile {
            id: id.to_string(),
            name: id.to_string(),
            pattern: pattern.to_string(),
            priority,
            ..Profile::default()
        }
    }

    #[test]
    fn test_priority_order_wins() {
        let mut broad = profile("broad", "*", 5);
        broad.prefix = "broad".into();
        let mut narrow = profile("narrow", "Screenshot*", 1);
        narrow.prefix = "narrow".into();
        let matcher = ProfileMatcher::new(&[broad, narrow]);

        let hit = matcher.match_basename("Screenshot 1.png").unwrap();
        assert_eq!(hit.id, "narrow");
        let hit = matcher.match_basename("other.png").unwrap();
        assert_eq!(hit.id, "broad");
    }

    #[test]
    fn test_glob_is_case_insensitive() {
        let matcher = ProfileMatcher::new(&[profile("heic", "*.heic", 0)]);
        assert!(matcher.test("IMG_0001.HEIC"));
        assert!(matcher.test("img.heic"));
        assert!(!matcher.test("img.png"));
    }

    #[test]
    fn test_dotfiles_never_match() {
        let matcher = ProfileMatcher::new(&[profile("all", "*", 0)]);
        assert!(!matcher.test(".DS_Store"));
        assert!(matcher.test("DS_Store"));
    }

    #[test]
    fn test_disabled_profiles_skipped() {
        let mut p = profile("off", "*", 0);
        p.enabled = false;
        let matcher = ProfileMatcher::new(&[p]);
        assert!(!matcher.test("anything.png"));
    }

    #[test]
    fn test_regex_profile() {
        let mut p = profile("re", r"^IMG_\d{4}\.jpe?g$", 0);
        p.is_regex = true;
        let matcher = ProfileMatcher::new(&[p]);
        assert!(matcher.test("IMG_1234.jpg"));
        assert!(matcher.test("IMG_1234.jpeg"));
        assert!(!matcher.test("IMG_12.jpg"));
    }

    #[test]
    fn test_invalid_regex_silently_dropped() {
        let mut bad = profile("bad", r"([", 0);
        bad.is_regex = true;
        let good = profile("good", "*.png", 1);
        let matcher = ProfileMatcher::new(&[bad, good]);
        assert_eq!(matcher.match_basename("a.png").unwrap().id, "good");
    }
}
