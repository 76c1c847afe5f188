//! OSGi bundle manifests and the wiring they declare.
//!
//! `META-INF/MANIFEST.MF` headers are turned into `osgi.wiring.*`
//! capabilities (`Export-Package`, the bundle and host capabilities,
//! `Provide-Capability`) and requirements (`Import-Package`,
//! `Require-Bundle`, `Fragment-Host`, `Require-Capability`, execution
//! environments).

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use p2index_resource::filter::escape;
use p2index_resource::{
    Attr, BUNDLE_SYMBOLIC_NAME_ATTRIBUTE, BUNDLE_VERSION_ATTRIBUTE, Capability, FILTER_DIRECTIVE,
    Filter, RESOLUTION_DIRECTIVE, RESOLUTION_OPTIONAL, Requirement, VERSION_ATTRIBUTE, namespace,
};
use p2index_shared::{P2IndexError, Result, Version, VersionRange};
use tracing::debug;

use crate::feature::read_entry;
use crate::rules::conjunction;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

const BUNDLE_SYMBOLIC_NAME: &str = "Bundle-SymbolicName";
const BUNDLE_VERSION: &str = "Bundle-Version";
const EXPORT_PACKAGE: &str = "Export-Package";
const IMPORT_PACKAGE: &str = "Import-Package";
const REQUIRE_BUNDLE: &str = "Require-Bundle";
const FRAGMENT_HOST: &str = "Fragment-Host";
const PROVIDE_CAPABILITY: &str = "Provide-Capability";
const REQUIRE_CAPABILITY: &str = "Require-Capability";
const REQUIRED_EE: &str = "Bundle-RequiredExecutionEnvironment";

const SPECIFICATION_VERSION: &str = "specification-version";
const SINGLETON_DIRECTIVE: &str = "singleton";

// ---------------------------------------------------------------------------
// Header clauses
// ---------------------------------------------------------------------------

/// One `,`-separated clause of a manifest header:
/// `name(;name)*(;key=value|;key:type=value|;key:=value)*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    pub names: Vec<String>,
    /// Attribute name to `(declared type, value)`.
    pub attributes: BTreeMap<String, (Option<String>, String)>,
    pub directives: BTreeMap<String, String>,
}

impl Clause {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|(_, value)| value.as_str())
    }

    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives.get(key).map(String::as_str)
    }

    fn is_optional(&self) -> bool {
        self.directive(RESOLUTION_DIRECTIVE) == Some(RESOLUTION_OPTIONAL)
    }
}

/// Split a header value into clauses.
pub fn parse_clauses(header: &str) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    for raw in split_unquoted(header, ',') {
        if raw.trim().is_empty() {
            continue;
        }
        let mut clause = Clause::default();
        for part in split_unquoted(raw, ';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some(eq) = part.find('=') else {
                clause.names.push(part.to_string());
                continue;
            };
            let (key, value) = (&part[..eq], unquote(part[eq + 1..].trim()));
            if let Some(key) = key.strip_suffix(':') {
                clause.directives.insert(key.trim().to_string(), value);
            } else {
                let (key, kind) = match key.split_once(':') {
                    Some((key, kind)) => (key.trim(), Some(kind.trim().to_string())),
                    None => (key.trim(), None),
                };
                clause.attributes.insert(key.to_string(), (kind, value));
            }
        }
        if clause.names.is_empty() {
            return Err(P2IndexError::parse(format!("header clause without a name: '{raw}'")));
        }
        clauses.push(clause);
    }
    Ok(clauses)
}

/// Split on `sep` outside double quotes.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Typed attribute value for `Provide-Capability`.
fn typed_attr(kind: Option<&str>, value: &str) -> Result<Attr> {
    let bad = |e: String| P2IndexError::parse(format!("attribute value '{value}': {e}"));
    Ok(match kind.map(str::trim) {
        None | Some("String") => Attr::from(value),
        Some("Version") => Attr::Version(Version::parse(value)?),
        Some("Long") => Attr::Long(value.trim().parse().map_err(|e| bad(format!("{e}")))?),
        Some(list) if list.starts_with("List") => Attr::List(
            value
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        ),
        Some(_) => Attr::from(value),
    })
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The main section of a bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleManifest {
    pub symbolic_name: String,
    pub version: Version,
    pub singleton: bool,
    headers: BTreeMap<String, String>,
}

impl BundleManifest {
    /// Read the manifest of a jar. `None` when the file is not an archive,
    /// has no manifest, or the manifest does not describe a bundle.
    pub fn from_jar(path: &Path) -> Result<Option<Self>> {
        let file = File::open(path).map_err(|e| P2IndexError::io(path, e))?;
        let mut archive = match zip::ZipArchive::new(file) {
            Ok(archive) => archive,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "not an archive, no manifest");
                return Ok(None);
            }
        };
        match read_entry(&mut archive, MANIFEST_PATH)? {
            Some(text) => Self::parse(&text),
            None => Ok(None),
        }
    }

    /// Parse manifest text. `None` without a `Bundle-SymbolicName`.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let headers = parse_headers(text);
        let Some(bsn) = headers.get(BUNDLE_SYMBOLIC_NAME) else {
            return Ok(None);
        };
        let Some(name) = parse_clauses(bsn)?.into_iter().next() else {
            return Ok(None);
        };
        let symbolic_name = name.names.first().cloned().unwrap_or_default();
        let version = Version::parse(headers.get(BUNDLE_VERSION).map_or("", String::as_str))?;

        Ok(Some(Self {
            symbolic_name,
            version,
            singleton: name.directive(SINGLETON_DIRECTIVE) == Some("true"),
            headers,
        }))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_fragment(&self) -> bool {
        self.headers.contains_key(FRAGMENT_HOST)
    }

    fn clauses(&self, header: &str) -> Result<Vec<Clause>> {
        self.header(header).map_or(Ok(Vec::new()), parse_clauses)
    }

    /// Wiring capabilities: bundle and host (not for fragments), exported
    /// packages and generic capabilities.
    pub fn capabilities(&self) -> Result<Vec<Capability>> {
        let mut capabilities = Vec::new();

        if !self.is_fragment() {
            for ns in [namespace::WIRING_BUNDLE, namespace::WIRING_HOST] {
                let mut cap = Capability::new(ns)
                    .with_attr(ns, self.symbolic_name.as_str())
                    .with_attr(BUNDLE_VERSION_ATTRIBUTE, self.version.clone());
                if self.singleton {
                    cap = cap.with_directive(SINGLETON_DIRECTIVE, "true");
                }
                capabilities.push(cap);
            }
        }

        for clause in self.clauses(EXPORT_PACKAGE)? {
            let version = clause
                .attribute(VERSION_ATTRIBUTE)
                .or_else(|| clause.attribute(SPECIFICATION_VERSION))
                .map_or(Ok(Version::zero()), Version::parse)?;
            for package in &clause.names {
                let mut cap = Capability::new(namespace::WIRING_PACKAGE)
                    .with_attr(namespace::WIRING_PACKAGE, package.as_str())
                    .with_attr(VERSION_ATTRIBUTE, version.clone())
                    .with_attr(BUNDLE_SYMBOLIC_NAME_ATTRIBUTE, self.symbolic_name.as_str())
                    .with_attr(BUNDLE_VERSION_ATTRIBUTE, self.version.clone());
                for (key, (_, value)) in &clause.attributes {
                    if key != VERSION_ATTRIBUTE && key != SPECIFICATION_VERSION {
                        cap = cap.with_attr(key.as_str(), value.as_str());
                    }
                }
                cap.directives.extend(clause.directives.clone());
                capabilities.push(cap);
            }
        }

        for clause in self.clauses(PROVIDE_CAPABILITY)? {
            for ns in &clause.names {
                let mut cap = Capability::new(ns.as_str());
                for (key, (kind, value)) in &clause.attributes {
                    cap = cap.with_attr(key.as_str(), typed_attr(kind.as_deref(), value)?);
                }
                cap.directives.extend(clause.directives.clone());
                capabilities.push(cap);
            }
        }
        Ok(capabilities)
    }

    /// Wiring requirements. Every generated filter is checked to parse.
    pub fn requirements(&self) -> Result<Vec<Requirement>> {
        let mut requirements = Vec::new();

        for clause in self.clauses(IMPORT_PACKAGE)? {
            let range = clause
                .attribute(VERSION_ATTRIBUTE)
                .or_else(|| clause.attribute(SPECIFICATION_VERSION));
            for package in &clause.names {
                let mut clauses = named(namespace::WIRING_PACKAGE, package);
                clauses.extend(range_clauses(VERSION_ATTRIBUTE, range)?);
                for (key, (_, value)) in &clause.attributes {
                    match key.as_str() {
                        VERSION_ATTRIBUTE | SPECIFICATION_VERSION => {}
                        BUNDLE_VERSION_ATTRIBUTE => {
                            clauses.extend(range_clauses(BUNDLE_VERSION_ATTRIBUTE, Some(value))?);
                        }
                        _ => clauses.push(format!("({key}={})", escape(value))),
                    }
                }
                requirements.push(wiring_requirement(namespace::WIRING_PACKAGE, clauses, &clause)?);
            }
        }

        for clause in self.clauses(REQUIRE_BUNDLE)? {
            let range = clause.attribute(BUNDLE_VERSION_ATTRIBUTE);
            for bundle in &clause.names {
                let mut clauses = named(namespace::WIRING_BUNDLE, bundle);
                clauses.extend(range_clauses(BUNDLE_VERSION_ATTRIBUTE, range)?);
                requirements.push(wiring_requirement(namespace::WIRING_BUNDLE, clauses, &clause)?);
            }
        }

        if let Some(host) = self.clauses(FRAGMENT_HOST)?.into_iter().next() {
            let mut clauses = named(namespace::WIRING_HOST, &host.names[0]);
            clauses.extend(range_clauses(
                BUNDLE_VERSION_ATTRIBUTE,
                host.attribute(BUNDLE_VERSION_ATTRIBUTE),
            )?);
            requirements.push(wiring_requirement(namespace::WIRING_HOST, clauses, &host)?);
        }

        for clause in self.clauses(REQUIRE_CAPABILITY)? {
            for ns in &clause.names {
                let mut req = Requirement::new(ns.as_str());
                if let Some(filter) = clause.directive(FILTER_DIRECTIVE) {
                    Filter::parse(filter)?;
                }
                req.directives.extend(clause.directives.clone());
                requirements.push(req);
            }
        }

        let environments: Vec<String> = self
            .clauses(REQUIRED_EE)?
            .iter()
            .flat_map(|c| c.names.iter())
            .map(|ee| format!("({}={})", namespace::EXECUTION_ENVIRONMENT, escape(ee)))
            .collect();
        let filter = match environments.len() {
            0 => None,
            1 => environments.into_iter().next(),
            _ => Some(format!("(|{})", environments.concat())),
        };
        if let Some(filter) = filter {
            requirements.push(Requirement::filtered(namespace::EXECUTION_ENVIRONMENT, filter));
        }

        Ok(requirements)
    }
}

/// Main-section headers. Continuation lines start with one space.
fn parse_headers(text: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    let mut current: Option<(String, String)> = None;
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix(' ') {
            if let Some((_, value)) = current.as_mut() {
                value.push_str(rest);
            }
            continue;
        }
        if let Some((key, value)) = current.take() {
            headers.insert(key, value);
        }
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            current = Some((key.trim().to_string(), value.trim_start().to_string()));
        }
    }
    if let Some((key, value)) = current {
        headers.insert(key, value);
    }
    headers
}

fn named(ns: &str, name: &str) -> Vec<String> {
    vec![format!("({ns}={})", escape(name))]
}

/// Clauses for a version range attribute; none for an absent or unbounded range.
fn range_clauses(attr: &str, range: Option<&str>) -> Result<Vec<String>> {
    let Some(range) = range else {
        return Ok(Vec::new());
    };
    let range = VersionRange::parse(range)?;
    if range.is_unbounded() {
        return Ok(Vec::new());
    }
    let filter = range.to_filter(attr);
    Ok(match Filter::parse(&filter)? {
        Filter::And(items) => items.iter().map(ToString::to_string).collect(),
        _ => vec![filter],
    })
}

fn wiring_requirement(ns: &str, clauses: Vec<String>, clause: &Clause) -> Result<Requirement> {
    let filter = conjunction(clauses);
    Filter::parse(&filter)?;
    let req = Requirement::filtered(ns, filter);
    Ok(if clause.is_optional() { req.optional() } else { req })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MANIFEST: &str = "Manifest-Version: 1.0\r
Bundle-ManifestVersion: 2\r
Bundle-SymbolicName: org.example.core;singleton:=true\r
Bundle-Version: 3.1.0.v2025\r
Export-Package: org.example.core;version=\"3.1.0\";uses:=\"org.example.ap\r
 i\",org.example.core.internal;x-internal:=true,org.example.util;org.exam\r
 ple.io;version=1.2\r
Import-Package: org.osgi.framework;version=\"[1.8,2)\",javax.annotation;\r
 resolution:=optional,org.example.api\r
Require-Bundle: org.example.base;bundle-version=\"[2.0.0,3.0.0)\";visibil\r
 ity:=reexport,org.example.extra;resolution:=optional\r
Provide-Capability: osgi.service;objectClass:List<String>=\"org.example.\r
 Service,org.example.Other\";ranking:Long=5\r
Require-Capability: osgi.extender;filter:=\"(&(osgi.extender=osgi.compon\r
 ent)(version>=1.3.0))\"\r
Bundle-RequiredExecutionEnvironment: JavaSE-17\r
\r
Name: org/example/core/Thing.class\r
SHA-256-Digest: abc\r
";

    fn manifest() -> BundleManifest {
        BundleManifest::parse(MANIFEST).unwrap().unwrap()
    }

    fn requirement<'a>(reqs: &'a [Requirement], needle: &str) -> &'a Requirement {
        reqs.iter()
            .find(|r| r.filter().is_some_and(|f| f.contains(needle)))
            .unwrap_or_else(|| panic!("no requirement mentioning {needle}"))
    }

    #[test]
    fn clauses_with_quotes_and_shared_parameters() {
        let clauses =
            parse_clauses(r#"a;b;version="[1,2)";uses:="x,y",c;size:Long=3"#).unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].names, vec!["a", "b"]);
        assert_eq!(clauses[0].attribute("version"), Some("[1,2)"));
        assert_eq!(clauses[0].directive("uses"), Some("x,y"));
        assert_eq!(
            clauses[1].attributes.get("size"),
            Some(&(Some("Long".to_string()), "3".to_string()))
        );
        assert!(parse_clauses(";version=1").is_err());
    }

    #[test]
    fn main_section_with_continuations() {
        let m = manifest();
        assert_eq!(m.symbolic_name, "org.example.core");
        assert_eq!(m.version, Version::parse("3.1.0.v2025").unwrap());
        assert!(m.singleton);
        assert!(!m.is_fragment());
        assert!(m.header("SHA-256-Digest").is_none());
        assert!(m.header(EXPORT_PACKAGE).unwrap().contains("org.example.api\""));
    }

    #[test]
    fn exports_and_generic_capabilities() {
        let caps = manifest().capabilities().unwrap();
        let packages: Vec<_> = caps
            .iter()
            .filter(|c| c.namespace == namespace::WIRING_PACKAGE)
            .collect();
        assert_eq!(packages.len(), 4);

        let core = packages.iter().find(|c| c.name() == Some("org.example.core")).unwrap();
        assert_eq!(core.attr(VERSION_ATTRIBUTE), Some(&Attr::Version(Version::new(3, 1, 0))));
        assert_eq!(core.directives.get("uses").map(String::as_str), Some("org.example.api"));
        assert_eq!(
            core.attr(BUNDLE_SYMBOLIC_NAME_ATTRIBUTE).map(ToString::to_string).as_deref(),
            Some("org.example.core")
        );
        let io = packages.iter().find(|c| c.name() == Some("org.example.io")).unwrap();
        assert_eq!(io.attr(VERSION_ATTRIBUTE), Some(&Attr::Version(Version::new(1, 2, 0))));

        let bundle = caps.iter().find(|c| c.namespace == namespace::WIRING_BUNDLE).unwrap();
        assert_eq!(bundle.name(), Some("org.example.core"));
        assert_eq!(bundle.directives.get("singleton").map(String::as_str), Some("true"));
        assert!(caps.iter().any(|c| c.namespace == namespace::WIRING_HOST));

        let service = caps.iter().find(|c| c.namespace == "osgi.service").unwrap();
        assert_eq!(
            service.attr("objectClass"),
            Some(&Attr::List(vec!["org.example.Service".into(), "org.example.Other".into()]))
        );
        assert_eq!(service.attr("ranking"), Some(&Attr::Long(5)));
    }

    #[test]
    fn imports_bundles_and_environment() {
        let reqs = manifest().requirements().unwrap();

        let framework = requirement(&reqs, "org.osgi.framework");
        assert_eq!(framework.namespace, namespace::WIRING_PACKAGE);
        assert_eq!(
            framework.filter(),
            Some("(&(osgi.wiring.package=org.osgi.framework)(version>=1.8.0)(!(version>=2.0.0)))")
        );
        assert!(requirement(&reqs, "javax.annotation").is_optional());
        assert_eq!(
            requirement(&reqs, "org.example.api").filter(),
            Some("(osgi.wiring.package=org.example.api)")
        );

        let base = requirement(&reqs, "org.example.base");
        assert_eq!(base.namespace, namespace::WIRING_BUNDLE);
        assert!(base.filter().unwrap().contains("(bundle-version>=2.0.0)"));
        assert!(requirement(&reqs, "org.example.extra").is_optional());

        let extender = reqs.iter().find(|r| r.namespace == "osgi.extender").unwrap();
        assert_eq!(
            extender.filter(),
            Some("(&(osgi.extender=osgi.component)(version>=1.3.0))")
        );
        assert_eq!(
            requirement(&reqs, "JavaSE-17").filter(),
            Some("(osgi.ee=JavaSE-17)")
        );
    }

    #[test]
    fn fragments_require_their_host() {
        let text = "Bundle-SymbolicName: org.example.core.nl\n\
                    Bundle-Version: 1.0.0\n\
                    Fragment-Host: org.example.core;bundle-version=\"[3.0.0,4.0.0)\"\n";
        let m = BundleManifest::parse(text).unwrap().unwrap();
        assert!(m.is_fragment());
        assert!(m.capabilities().unwrap().is_empty());

        let reqs = m.requirements().unwrap();
        let host = requirement(&reqs, "osgi.wiring.host=org.example.core");
        assert_eq!(host.namespace, namespace::WIRING_HOST);
        assert!(host.filter().unwrap().contains("(!(bundle-version>=4.0.0))"));
    }

    #[test]
    fn plain_jars_and_other_files_have_no_manifest() {
        assert!(BundleManifest::parse("Manifest-Version: 1.0\n").unwrap().is_none());

        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("a.jar");
        std::fs::write(&text, b"not a zip").unwrap();
        assert!(BundleManifest::from_jar(&text).unwrap().is_none());

        let jar = dir.path().join("b.jar");
        {
            let mut zip = zip::ZipWriter::new(File::create(&jar).unwrap());
            zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"hi").unwrap();
            zip.finish().unwrap();
        }
        assert!(BundleManifest::from_jar(&jar).unwrap().is_none());
    }

    #[test]
    fn bad_ranges_are_parse_errors() {
        let text = "Bundle-SymbolicName: a\nImport-Package: b;version=\"[2,1)\"\n";
        let m = BundleManifest::parse(text).unwrap().unwrap();
        assert!(matches!(m.requirements(), Err(P2IndexError::Parse { .. })));
    }
}
