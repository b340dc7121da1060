// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Normalizing image name comparison.

const DEFAULT_REGISTRIES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];
const LATEST: &str = "latest";

/// An image reference split into repository name and tag or digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
	pub name: String,
	pub tag: Option<String>,
}

impl ImageRef {
	/// Parse and normalize an image reference.
	///
	/// Docker Hub references lose their registry and `library/` prefix, so
	/// `nginx`, `docker.io/nginx` and `docker.io/library/nginx` share a name.
	pub fn parse(image: &str) -> Self {
		let image = image.trim();
		let (rest, digest) = match image.split_once('@') {
			Some((rest, digest)) => (rest, Some(digest)),
			None => (image, None),
		};

		let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
		let (name, tag) = match rest[last_slash..].rfind(':') {
			Some(i) => (&rest[..last_slash + i], Some(&rest[last_slash + i + 1..])),
			None => (rest, None),
		};

		let mut name = name;
		if let Some((domain, path)) = name.split_once('/') {
			let is_domain = domain.contains('.') || domain.contains(':') || domain == "localhost";
			if !is_domain || DEFAULT_REGISTRIES.contains(&domain) {
				if DEFAULT_REGISTRIES.contains(&domain) {
					name = path;
				}
				name = name.strip_prefix("library/").unwrap_or(name);
			}
		}

		let tag = match (tag, digest) {
			(_, Some(digest)) => Some(format!("@{digest}")),
			(Some(tag), None) => Some(tag.to_string()),
			(None, None) => None,
		};

		Self {
			name: name.to_string(),
			tag,
		}
	}
}

/// Compare with `#` in the pattern matching exactly one ASCII letter.
fn wildcard_eq(pattern: &str, value: &str) -> bool {
	pattern.chars().count() == value.chars().count()
		&& pattern
			.chars()
			.zip(value.chars())
			.all(|(p, v)| if p == '#' { v.is_ascii_alphabetic() } else { p == v })
}

/// Whether a container image matches an image selector pattern.
///
/// A pattern without a tag matches any tag. A pattern tagged `latest` also
/// matches an untagged image. Any other tag must match exactly.
pub fn compare_image_names(pattern: &str, image: &str) -> bool {
	let pattern = ImageRef::parse(pattern);
	let image = ImageRef::parse(image);
	if !wildcard_eq(&pattern.name, &image.name) {
		return false;
	}

	match (pattern.tag.as_deref(), image.tag.as_deref()) {
		(None, _) => true,
		(Some(LATEST), None) => true,
		(Some(expected), Some(actual)) => wildcard_eq(expected, actual),
		(Some(_), None) => false,
	}
}
