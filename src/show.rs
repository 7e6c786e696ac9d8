//! Plain-text rendering of a package for `fwpack show`.

use std::fmt::Write;

use fwpack_core::{InstallationSetMode, Package};

pub fn render(package: &Package) -> String {
    let mut out = String::new();
    let unset = "(not set)";
    let _ = writeln!(out, "Product: {}", package.product.as_deref().unwrap_or(unset));
    let _ = writeln!(out, "Version: {}", package.version.as_deref().unwrap_or(unset));
    if let Some(uid) = &package.uid {
        let _ = writeln!(out, "Package UID: {}", uid);
    }
    let _ = writeln!(out, "Mode: {}", package.mode().name());
    if package.mode() == InstallationSetMode::ActiveInactive {
        let _ = writeln!(out, "Active backup backend: {}", package.active_backup_backend);
    }

    if package.is_empty() {
        let _ = writeln!(out, "\nNo objects.");
        return out;
    }
    for (set, objects) in package.objects().iter().enumerate() {
        let _ = writeln!(out, "\nInstallation set {}", set);
        for (index, object) in objects.iter().enumerate() {
            let _ = writeln!(out, "  {}# {} [{}]", index, object.filename().display(), object.mode());
            for (name, value) in object.options() {
                let _ = writeln!(out, "      {:<24} {}", name, value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwpack_core::{Mode, ObjectSpec};

    #[test]
    fn test_render_empty_package() {
        let mut package = Package::new(InstallationSetMode::Single);
        package.product = Some("P1".to_string());
        let text = render(&package);
        assert!(text.contains("Product: P1"));
        assert!(text.contains("Version: (not set)"));
        assert!(text.contains("No objects."));
        assert!(!text.contains("Active backup backend"));
    }

    #[test]
    fn test_render_lists_every_set() {
        let mut package = Package::new(InstallationSetMode::ActiveInactive);
        package
            .objects_mut()
            .create(&ObjectSpec::new("rootfs.img", Mode::Raw).with_option("target-device", "/dev/sda1"))
            .unwrap();
        package
            .objects_mut()
            .update(0, "target-device", "/dev/sda2", Some(1))
            .unwrap();
        let text = render(&package);
        assert!(text.contains("Installation set 0"));
        assert!(text.contains("Installation set 1"));
        assert!(text.contains("0# rootfs.img [raw]"));
        assert!(text.contains("/dev/sda1"));
        assert!(text.contains("/dev/sda2"));
        assert!(text.contains("Active backup backend: u-boot"));
    }
}
