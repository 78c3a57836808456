//! Picks which lifecycle backend manages chunk-server processes (spec §4.10).

use std::path::Path;

const POD_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
const CONTAINER_MARKER_FILE: &str = "/.dockerenv";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RuntimeBackend {
	Local,
	Container,
	Kubernetes,
}

impl RuntimeBackend {
	/// Reads `CLUSTER_MODE` first; falls back to probing the environment for
	/// a pod service-account namespace file, then a container marker file.
	pub fn detect() -> Self {
		if let Ok(mode) = std::env::var("CLUSTER_MODE") {
			if let Some(backend) = Self::from_mode_str(&mode) {
				return backend;
			}
		}
		Self::probe(Path::new(POD_NAMESPACE_FILE), Path::new(CONTAINER_MARKER_FILE))
	}

	fn from_mode_str(mode: &str) -> Option<Self> {
		match mode {
			"kubernetes" => Some(Self::Kubernetes),
			"docker" => Some(Self::Container),
			"local" => Some(Self::Local),
			_ => None,
		}
	}

	fn probe(pod_namespace_file: &Path, container_marker_file: &Path) -> Self {
		if pod_namespace_file.exists() {
			Self::Kubernetes
		} else if container_marker_file.exists() {
			Self::Container
		} else {
			Self::Local
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn probe_prefers_kubernetes_over_container() {
		let dir = tempfile::tempdir().unwrap();
		let pod_file = dir.path().join("namespace");
		let docker_file = dir.path().join("dockerenv");
		std::fs::write(&pod_file, "default").unwrap();
		std::fs::write(&docker_file, "").unwrap();
		assert_eq!(RuntimeBackend::probe(&pod_file, &docker_file), RuntimeBackend::Kubernetes);
	}

	#[test]
	fn probe_falls_back_to_container() {
		let dir = tempfile::tempdir().unwrap();
		let pod_file = dir.path().join("namespace");
		let docker_file = dir.path().join("dockerenv");
		std::fs::write(&docker_file, "").unwrap();
		assert_eq!(RuntimeBackend::probe(&pod_file, &docker_file), RuntimeBackend::Container);
	}

	#[test]
	fn probe_falls_back_to_local() {
		let dir = tempfile::tempdir().unwrap();
		let pod_file = dir.path().join("namespace");
		let docker_file = dir.path().join("dockerenv");
		assert_eq!(RuntimeBackend::probe(&pod_file, &docker_file), RuntimeBackend::Local);
	}

	#[test]
	fn from_mode_str_parses_known_values() {
		assert_eq!(RuntimeBackend::from_mode_str("kubernetes"), Some(RuntimeBackend::Kubernetes));
		assert_eq!(RuntimeBackend::from_mode_str("docker"), Some(RuntimeBackend::Container));
		assert_eq!(RuntimeBackend::from_mode_str("local"), Some(RuntimeBackend::Local));
		assert_eq!(RuntimeBackend::from_mode_str("bogus"), None);
	}
}
