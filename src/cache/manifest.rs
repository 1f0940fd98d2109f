//! Product catalog published by the manifest endpoint.
//!
//! The document lists one `<File>` element per downloadable base image. Only
//! the fields needed to select and verify a file are kept.

use std::collections::BTreeSet;

use serde::Serialize;
use xmltree::{Element, XMLNode};

use crate::error::{Error, Result};

/// One downloadable base image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestFile {
    pub file_name: String,
    pub language_code: String,
    pub edition: String,
    pub architecture: String,
    /// Declared size in bytes, when present.
    pub size: Option<u64>,
    /// Hex SHA-1 of the file as published.
    pub sha1: String,
    pub url: String,
}

/// Parsed manifest document.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    files: Vec<ManifestFile>,
}

impl Manifest {
    /// Parse the XML product catalog.
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let root = Element::parse(xml).map_err(|e| Error::Manifest(format!("invalid XML: {e}")))?;
        let mut files = Vec::new();
        collect_files(&root, &mut files)?;
        Ok(Self { files })
    }

    pub fn files(&self) -> &[ManifestFile] {
        &self.files
    }

    /// The unique record matching all three selectors, case-insensitively.
    pub fn select(&self, language: &str, edition: &str, architecture: &str) -> Result<&ManifestFile> {
        let architecture = normalize_architecture(architecture);
        let matches: Vec<&ManifestFile> = self
            .files
            .iter()
            .filter(|f| {
                f.language_code.eq_ignore_ascii_case(language)
                    && f.edition.eq_ignore_ascii_case(edition)
                    && f.architecture.eq_ignore_ascii_case(architecture)
            })
            .collect();

        match matches.as_slice() {
            [only] => Ok(only),
            _ => Err(Error::Selection {
                language: language.to_string(),
                edition: edition.to_string(),
                architecture: architecture.to_string(),
                matches: matches.len(),
            }),
        }
    }

    pub fn languages(&self) -> Vec<String> {
        distinct(self.files.iter().map(|f| f.language_code.as_str()))
    }

    pub fn editions(&self) -> Vec<String> {
        distinct(self.files.iter().map(|f| f.edition.as_str()))
    }

    pub fn architectures(&self) -> Vec<String> {
        distinct(self.files.iter().map(|f| f.architecture.as_str()))
    }
}

/// `amd64` is published as `x64`.
pub fn normalize_architecture(architecture: &str) -> &str {
    if architecture.eq_ignore_ascii_case("amd64") {
        "x64"
    } else {
        architecture
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn collect_files(element: &Element, out: &mut Vec<ManifestFile>) -> Result<()> {
    if element.name == "File" && element.get_child("FileName").is_some() {
        out.push(file_record(element)?);
        return Ok(());
    }
    for child in &element.children {
        if let XMLNode::Element(child) = child {
            collect_files(child, out)?;
        }
    }
    Ok(())
}

fn file_record(element: &Element) -> Result<ManifestFile> {
    let file_name = child_text(element, "FileName")?;
    let size = match optional_text(element, "Size") {
        Some(s) => Some(s.parse::<u64>().map_err(|_| {
            Error::Manifest(format!("invalid Size '{s}' for {file_name}"))
        })?),
        None => None,
    };
    Ok(ManifestFile {
        language_code: child_text(element, "LanguageCode")?,
        edition: child_text(element, "Edition")?,
        architecture: child_text(element, "Architecture")?,
        size,
        sha1: child_text(element, "Sha1")?.to_ascii_lowercase(),
        url: child_text(element, "FilePath")?,
        file_name,
    })
}

fn optional_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .and_then(Element::get_text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn child_text(element: &Element, name: &str) -> Result<String> {
    optional_text(element, name)
        .ok_or_else(|| Error::Manifest(format!("<File> is missing <{name}>")))
}
