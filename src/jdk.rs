//! Target-JDK discovery and `-release` handling for scalac options.
//!
//! When a project compiles against a javac older than the JVM the server
//! runs on, scalac must be told to emit bytecode for the older target or the
//! produced classfiles will not link at runtime. The adjustment is best
//! effort: any failure to read or parse the target version leaves the
//! options untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use std::{fs, path::Path};

/// Flags that already pin a bytecode target; their presence skips the
/// adjustment entirely.
const RELEASE_FLAGS: &[&str] = &["-release", "--release", "-java-output-version"];

/// Matches `JAVA_VERSION="17.0.2"` in a JDK `release` properties file.
static RE_JAVA_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^JAVA_VERSION="?(?P<version>[^"\r\n]+)"?"#).unwrap());

/// Matches the leading digits of a version string.
static RE_MAJOR_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<major>\d+)").unwrap());

/// The JVM the build server itself runs on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerJdk {
    pub java_home: std::path::PathBuf,
    pub major: u32,
}

/// Reads the version of the JDK rooted at `home`.
///
/// Modern JDKs carry a `release` properties file with a `JAVA_VERSION` key;
/// a JDK 8 installation is recognized by `lib/rt.jar` instead and reported
/// as `1.8`.
pub fn version_from_java_home(home: &Path) -> Option<String> {
    if let Ok(contents) = fs::read_to_string(home.join("release")) {
        if let Some(caps) = RE_JAVA_VERSION.captures(&contents) {
            return Some(caps["version"].trim().to_string());
        }
    }
    home.join("lib").join("rt.jar").exists().then(|| "1.8".to_string())
}

/// Parses the major version out of a JDK version string.
///
/// `1.8` style versions map to their minor component (`8`); everything else
/// takes the leading digits (`17.0.2` -> `17`, `9-ea` -> `9`).
pub fn major_version(version: &str) -> Option<u32> {
    let version = version.strip_prefix("1.").unwrap_or(version);
    let caps = RE_MAJOR_VERSION.captures(version)?;
    caps["major"].parse().ok()
}

/// Appends `-release <n>` to `scalac_options` when the project's javac
/// targets an older JDK than the server's own JVM.
///
/// The options are left untouched when a target is already pinned, when the
/// project compiles with the server's own JDK, or when the target version
/// cannot be determined.
pub fn adjust_scalac_options_for_release(
    scalac_options: Vec<String>,
    javac_bin: Option<&Path>,
    server: &ServerJdk,
) -> Vec<String> {
    if scalac_options.iter().any(|opt| RELEASE_FLAGS.contains(&opt.as_str())) {
        return scalac_options;
    }
    let Some(javac_bin) = javac_bin else { return scalac_options };
    let Some(home) = javac_bin.parent().and_then(Path::parent) else { return scalac_options };
    if home == server.java_home {
        return scalac_options;
    }
    let Some(target_major) = version_from_java_home(home).as_deref().and_then(major_version)
    else {
        return scalac_options;
    };

    if server.major > target_major {
        trace!(
            "targeting JDK {target_major} from a JDK {} server, appending -release",
            server.major
        );
        let mut scalac_options = scalac_options;
        scalac_options.push("-release".to_string());
        scalac_options.push(target_major.to_string());
        scalac_options
    } else {
        if server.major < target_major {
            warn!(
                "the project targets JDK {target_major} but the build server runs on JDK {}; \
                 runtime and build JDK may diverge",
                server.major
            );
        }
        scalac_options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn opts(flags: &[&str]) -> Vec<String> {
        flags.iter().map(|s| s.to_string()).collect()
    }

    fn fake_jdk(root: &Path, name: &str, release: Option<&str>, rt_jar: bool) -> PathBuf {
        let home = root.join(name);
        std::fs::create_dir_all(home.join("bin")).unwrap();
        utils::touch(&home.join("bin").join("javac")).unwrap();
        if let Some(contents) = release {
            std::fs::write(home.join("release"), contents).unwrap();
        }
        if rt_jar {
            std::fs::create_dir_all(home.join("lib")).unwrap();
            utils::touch(&home.join("lib").join("rt.jar")).unwrap();
        }
        home
    }

    #[test]
    fn parses_major_versions() {
        assert_eq!(major_version("1.8"), Some(8));
        assert_eq!(major_version("1.8.0_292"), Some(8));
        assert_eq!(major_version("17.0.2"), Some(17));
        assert_eq!(major_version("9-ea"), Some(9));
        assert_eq!(major_version("garbage"), None);
    }

    #[test]
    fn reads_version_from_release_file() {
        let tmp = tempfile::tempdir().unwrap();
        let home = fake_jdk(
            tmp.path(),
            "jdk17",
            Some("IMPLEMENTOR=\"Eclipse\"\nJAVA_VERSION=\"17.0.2\"\n"),
            false,
        );
        assert_eq!(version_from_java_home(&home).as_deref(), Some("17.0.2"));
    }

    #[test]
    fn falls_back_to_rt_jar_for_jdk8() {
        let tmp = tempfile::tempdir().unwrap();
        let home = fake_jdk(tmp.path(), "jdk8", None, true);
        assert_eq!(version_from_java_home(&home).as_deref(), Some("1.8"));
        assert_eq!(version_from_java_home(&tmp.path().join("nope")), None);
    }

    #[test]
    fn appends_release_for_older_target() {
        let tmp = tempfile::tempdir().unwrap();
        let home = fake_jdk(tmp.path(), "jdk11", Some("JAVA_VERSION=\"11.0.19\"\n"), false);
        let server = ServerJdk { java_home: tmp.path().join("jdk17"), major: 17 };

        let adjusted = adjust_scalac_options_for_release(
            opts(&["-deprecation"]),
            Some(&home.join("bin").join("javac")),
            &server,
        );
        assert_eq!(adjusted, opts(&["-deprecation", "-release", "11"]));
    }

    #[test]
    fn leaves_options_alone_when_pinned_or_same_home() {
        let tmp = tempfile::tempdir().unwrap();
        let home = fake_jdk(tmp.path(), "jdk11", Some("JAVA_VERSION=\"11\"\n"), false);
        let javac = home.join("bin").join("javac");
        let server = ServerJdk { java_home: tmp.path().join("jdk17"), major: 17 };

        let pinned = opts(&["--release", "11"]);
        assert_eq!(
            adjust_scalac_options_for_release(pinned.clone(), Some(&javac), &server),
            pinned
        );

        let same_home = ServerJdk { java_home: home.clone(), major: 11 };
        assert_eq!(
            adjust_scalac_options_for_release(opts(&[]), Some(&javac), &same_home),
            opts(&[])
        );
    }

    #[test]
    fn swallows_unparseable_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let home = fake_jdk(tmp.path(), "odd", Some("JAVA_VERSION=\"weird\"\n"), false);
        let server = ServerJdk { java_home: tmp.path().join("jdk17"), major: 17 };
        let original = opts(&["-deprecation"]);
        let adjusted = adjust_scalac_options_for_release(
            original.clone(),
            Some(&home.join("bin").join("javac")),
            &server,
        );
        assert_eq!(adjusted, original);
    }

    #[test]
    fn equal_and_newer_targets_do_not_append() {
        let tmp = tempfile::tempdir().unwrap();
        let home = fake_jdk(tmp.path(), "jdk21", Some("JAVA_VERSION=\"21\"\n"), false);
        let javac = home.join("bin").join("javac");

        let equal = ServerJdk { java_home: tmp.path().join("other21"), major: 21 };
        assert_eq!(adjust_scalac_options_for_release(opts(&[]), Some(&javac), &equal), opts(&[]));

        let older_server = ServerJdk { java_home: tmp.path().join("jdk17"), major: 17 };
        assert_eq!(
            adjust_scalac_options_for_release(opts(&[]), Some(&javac), &older_server),
            opts(&[])
        );
    }
}
