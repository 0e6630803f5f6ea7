//! # Device Enumeration and Selection
//!
//! Lists OpenCL platforms and their devices, filtered by device class, and
//! picks the device the benchmark runs on.
//!
//! Selection is a total function: either a device comes back or the caller
//! gets [`BenchError::NoDeviceAvailable`]. When nothing in the preferred class
//! matches, the fallback to the general-purpose processor class is explicit and
//! reported through [`Selection::fell_back`].

use std::fmt;
use std::ptr;
use std::str::FromStr;

use opencl3::device::{Device, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU};
use opencl3::error_codes::CL_DEVICE_NOT_FOUND;
use opencl3::platform::{get_platforms, Platform};
use opencl3::types::{cl_device_id, cl_device_type, cl_platform_id};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BenchError, ClResultExt, Result};

/// Device classes the benchmark distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Accelerator (graphics processor).
    Gpu,
    /// General-purpose processor.
    Cpu,
}

impl DeviceClass {
    pub fn cl_type(self) -> cl_device_type {
        match self {
            DeviceClass::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceClass::Cpu => CL_DEVICE_TYPE_CPU,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Gpu => write!(f, "gpu"),
            DeviceClass::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceClass::Gpu),
            "cpu" => Ok(DeviceClass::Cpu),
            other => Err(format!("unknown device class '{other}' (expected gpu or cpu)")),
        }
    }
}

/// One compute-driver implementation.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub id: cl_platform_id,
    pub name: String,
}

/// A device on some platform. Immutable once selected.
#[derive(Debug, Clone)]
pub struct ComputeDevice {
    pub id: cl_device_id,
    pub name: String,
    pub vendor: String,
    pub class: DeviceClass,
    pub platform_name: String,
    /// Largest work-group the device accepts; 0 when unknown.
    pub max_work_group_size: usize,
}

impl ComputeDevice {
    pub fn is_null(&self) -> bool {
        self.id.is_null()
    }

    /// Case-insensitive substring match of the device name.
    pub fn name_matches(&self, preference: &str) -> bool {
        self.name
            .to_lowercase()
            .contains(&preference.to_lowercase())
    }
}

/// Source of platforms and devices.
///
/// [`OpenClCatalog`] asks the driver; tests supply a fixed catalog.
pub trait DeviceCatalog {
    fn platforms(&self) -> Result<Vec<PlatformInfo>>;

    /// Devices of `class` on `platform`, in driver order. An empty list is not an error.
    fn devices(&self, platform: &PlatformInfo, class: DeviceClass) -> Result<Vec<ComputeDevice>>;
}

/// Catalog backed by the installed OpenCL driver(s).
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenClCatalog;

impl DeviceCatalog for OpenClCatalog {
    fn platforms(&self) -> Result<Vec<PlatformInfo>> {
        let platforms = get_platforms().or_driver("clGetPlatformIDs")?;

        platforms
            .into_iter()
            .map(|platform| {
                let name = platform.name().or_driver("clGetPlatformInfo")?;
                Ok(PlatformInfo {
                    id: platform.id(),
                    name: trim_cl_string(&name),
                })
            })
            .collect()
    }

    fn devices(&self, platform: &PlatformInfo, class: DeviceClass) -> Result<Vec<ComputeDevice>> {
        let ids = match Platform::new(platform.id).get_devices(class.cl_type()) {
            Ok(ids) => ids,
            Err(err) if err.0 == CL_DEVICE_NOT_FOUND => Vec::new(),
            Err(err) => return Err(BenchError::driver("clGetDeviceIDs", err)),
        };

        ids.into_iter()
            .map(|id| {
                let device = Device::new(id);
                let name = device.name().or_driver("clGetDeviceInfo(CL_DEVICE_NAME)")?;
                let vendor = device
                    .vendor()
                    .or_driver("clGetDeviceInfo(CL_DEVICE_VENDOR)")?;
                let max_work_group_size = device
                    .max_work_group_size()
                    .or_driver("clGetDeviceInfo(CL_DEVICE_MAX_WORK_GROUP_SIZE)")?;

                debug!(
                    "Found {} device: {} (vendor: {})",
                    class,
                    name.trim(),
                    vendor.trim()
                );

                Ok(ComputeDevice {
                    id,
                    name: trim_cl_string(&name),
                    vendor: trim_cl_string(&vendor),
                    class,
                    platform_name: platform.name.clone(),
                    max_work_group_size,
                })
            })
            .collect()
    }
}

/// Driver strings may carry a trailing NUL and padding.
fn trim_cl_string(raw: &str) -> String {
    raw.trim_end_matches('\0').trim().to_string()
}

/// Walks platforms in enumeration order and returns the first device of
/// `class` whose name contains `preference` (case-insensitive).
pub fn select_device<C: DeviceCatalog + ?Sized>(
    catalog: &C,
    platforms: &[PlatformInfo],
    class: DeviceClass,
    preference: &str,
) -> Result<Option<ComputeDevice>> {
    for platform in platforms {
        debug!("Scanning OpenCL platform: {}", platform.name);
        let devices = catalog.devices(platform, class)?;
        if let Some(device) = devices.into_iter().find(|d| d.name_matches(preference)) {
            return Ok(Some(device));
        }
    }
    Ok(None)
}

/// How [`choose_device`] should pick.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionPolicy {
    /// Name substring to look for, e.g. a vendor.
    pub preference: String,
    pub class: DeviceClass,
    /// Fall back to the general-purpose processor class if `class` yields nothing.
    /// On by default; `--no-cpu-fallback` turns it off.
    pub cpu_fallback: bool,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            preference: "nvidia".to_string(),
            class: DeviceClass::Gpu,
            cpu_fallback: true,
        }
    }
}

/// Outcome of [`choose_device`].
#[derive(Debug, Clone)]
pub struct Selection {
    pub device: ComputeDevice,
    /// True when the device came from the processor fallback.
    pub fell_back: bool,
}

/// Picks a device according to `policy`.
///
/// Order: a `policy.class` device matching the preference; then, when
/// `cpu_fallback` is set, a processor matching the preference, then the first
/// processor on any platform.
pub fn choose_device<C: DeviceCatalog + ?Sized>(
    catalog: &C,
    policy: &SelectionPolicy,
) -> Result<Selection> {
    let platforms = catalog.platforms()?;
    info!("Found {} OpenCL platform(s)", platforms.len());

    if let Some(device) = select_device(catalog, &platforms, policy.class, &policy.preference)? {
        return Ok(Selection {
            device,
            fell_back: false,
        });
    }

    if policy.cpu_fallback {
        warn!(
            "No {} device matches '{}', falling back to processor devices",
            policy.class, policy.preference
        );

        // A processor class was already searched by name above.
        let by_name = if policy.class == DeviceClass::Cpu {
            None
        } else {
            select_device(catalog, &platforms, DeviceClass::Cpu, &policy.preference)?
        };
        let device = match by_name {
            Some(device) => Some(device),
            None => select_device(catalog, &platforms, DeviceClass::Cpu, "")?,
        };

        if let Some(device) = device {
            return Ok(Selection {
                device,
                fell_back: true,
            });
        }
    }

    Err(BenchError::NoDeviceAvailable {
        preference: policy.preference.clone(),
        fallback: policy.cpu_fallback,
    })
}

/// A device with a null handle, used to exercise the session's null-device check.
pub fn null_device() -> ComputeDevice {
    ComputeDevice {
        id: ptr::null_mut(),
        name: String::new(),
        vendor: String::new(),
        class: DeviceClass::Gpu,
        platform_name: String::new(),
        max_work_group_size: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Fixed catalog: platform index -> devices.
    struct FixedCatalog {
        platforms: Vec<(String, Vec<(String, DeviceClass)>)>,
        device_queries: Cell<usize>,
    }

    impl FixedCatalog {
        fn new(platforms: Vec<(&str, Vec<(&str, DeviceClass)>)>) -> Self {
            Self {
                platforms: platforms
                    .into_iter()
                    .map(|(name, devices)| {
                        (
                            name.to_string(),
                            devices
                                .into_iter()
                                .map(|(d, class)| (d.to_string(), class))
                                .collect(),
                        )
                    })
                    .collect(),
                device_queries: Cell::new(0),
            }
        }
    }

    fn fake_handle(platform: usize, device: usize) -> cl_device_id {
        ((platform + 1) * 1000 + device + 1) as cl_device_id
    }

    impl DeviceCatalog for FixedCatalog {
        fn platforms(&self) -> Result<Vec<PlatformInfo>> {
            Ok(self
                .platforms
                .iter()
                .enumerate()
                .map(|(i, (name, _))| PlatformInfo {
                    id: (i + 1) as cl_platform_id,
                    name: name.clone(),
                })
                .collect())
        }

        fn devices(&self, platform: &PlatformInfo, class: DeviceClass) -> Result<Vec<ComputeDevice>> {
            self.device_queries.set(self.device_queries.get() + 1);
            let index = platform.id as usize - 1;
            let (_, devices) = &self.platforms[index];
            Ok(devices
                .iter()
                .enumerate()
                .filter(|(_, (_, c))| *c == class)
                .map(|(i, (name, c))| ComputeDevice {
                    id: fake_handle(index, i),
                    name: name.clone(),
                    vendor: String::new(),
                    class: *c,
                    platform_name: platform.name.clone(),
                    max_work_group_size: 1024,
                })
                .collect())
        }
    }

    struct FailingCatalog;

    impl DeviceCatalog for FailingCatalog {
        fn platforms(&self) -> Result<Vec<PlatformInfo>> {
            Err(BenchError::driver(
                "clGetPlatformIDs",
                opencl3::error_codes::ClError(-1001),
            ))
        }

        fn devices(&self, _: &PlatformInfo, _: DeviceClass) -> Result<Vec<ComputeDevice>> {
            unreachable!("no platforms")
        }
    }

    #[test]
    fn test_select_first_matching_gpu_case_insensitive() {
        let catalog = FixedCatalog::new(vec![
            ("Intel(R) OpenCL", vec![("Intel(R) Core(TM) i7", DeviceClass::Cpu)]),
            (
                "NVIDIA CUDA",
                vec![
                    ("NVIDIA GeForce RTX 3080", DeviceClass::Gpu),
                    ("NVIDIA GeForce GTX 1080", DeviceClass::Gpu),
                ],
            ),
        ]);
        let platforms = catalog.platforms().unwrap();
        let device = select_device(&catalog, &platforms, DeviceClass::Gpu, "nvidia")
            .unwrap()
            .expect("an NVIDIA device");
        assert_eq!(device.name, "NVIDIA GeForce RTX 3080");
        assert_eq!(device.platform_name, "NVIDIA CUDA");
        assert_eq!(device.class, DeviceClass::Gpu);
    }

    #[test]
    fn test_no_gpu_returns_none_never_wrong_class() {
        let catalog = FixedCatalog::new(vec![(
            "Portable Computing Language",
            vec![("NVIDIA-branded cpu emulation", DeviceClass::Cpu)],
        )]);
        let platforms = catalog.platforms().unwrap();
        let found = select_device(&catalog, &platforms, DeviceClass::Gpu, "nvidia").unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_choose_falls_back_to_cpu_explicitly() {
        let catalog = FixedCatalog::new(vec![
            ("AMD APP", vec![("gfx1030", DeviceClass::Gpu)]),
            ("PoCL", vec![("pthread-AMD Ryzen 9", DeviceClass::Cpu)]),
        ]);
        let selection = choose_device(&catalog, &SelectionPolicy::default()).unwrap();
        assert!(selection.fell_back);
        assert_eq!(selection.device.class, DeviceClass::Cpu);
        assert_eq!(selection.device.name, "pthread-AMD Ryzen 9");
    }

    #[test]
    fn test_fallback_prefers_matching_cpu_name() {
        let catalog = FixedCatalog::new(vec![
            ("PoCL", vec![("pthread-AMD Ryzen 9", DeviceClass::Cpu)]),
            ("Intel(R) OpenCL", vec![("Intel(R) Xeon(R)", DeviceClass::Cpu)]),
        ]);
        let policy = SelectionPolicy {
            preference: "xeon".into(),
            ..SelectionPolicy::default()
        };
        let selection = choose_device(&catalog, &policy).unwrap();
        assert!(selection.fell_back);
        assert_eq!(selection.device.name, "Intel(R) Xeon(R)");
    }

    #[test]
    fn test_cpu_class_falls_back_to_first_processor() {
        let catalog = FixedCatalog::new(vec![("PoCL", vec![("pthread-AMD Ryzen 9", DeviceClass::Cpu)])]);
        let policy = SelectionPolicy {
            class: DeviceClass::Cpu,
            ..SelectionPolicy::default()
        };
        let selection = choose_device(&catalog, &policy).unwrap();
        assert!(selection.fell_back);
        assert_eq!(selection.device.name, "pthread-AMD Ryzen 9");

        let strict = SelectionPolicy {
            cpu_fallback: false,
            ..policy
        };
        assert!(matches!(
            choose_device(&catalog, &strict),
            Err(BenchError::NoDeviceAvailable { .. })
        ));
    }

    #[test]
    fn test_choose_without_fallback_is_an_error() {
        let catalog = FixedCatalog::new(vec![("PoCL", vec![("pthread-cpu", DeviceClass::Cpu)])]);
        let policy = SelectionPolicy {
            cpu_fallback: false,
            ..SelectionPolicy::default()
        };
        let err = choose_device(&catalog, &policy).unwrap_err();
        assert!(matches!(err, BenchError::NoDeviceAvailable { fallback: false, .. }));
    }

    #[test]
    fn test_choose_with_no_devices_at_all() {
        let catalog = FixedCatalog::new(vec![("Empty", vec![])]);
        let err = choose_device(&catalog, &SelectionPolicy::default()).unwrap_err();
        assert!(matches!(err, BenchError::NoDeviceAvailable { .. }));
    }

    #[test]
    fn test_matching_gpu_does_not_query_fallback() {
        let catalog = FixedCatalog::new(vec![("NVIDIA CUDA", vec![("NVIDIA A100", DeviceClass::Gpu)])]);
        let selection = choose_device(&catalog, &SelectionPolicy::default()).unwrap();
        assert!(!selection.fell_back);
        assert_eq!(catalog.device_queries.get(), 1);
    }

    #[test]
    fn test_enumeration_failure_propagates() {
        let err = choose_device(&FailingCatalog, &SelectionPolicy::default()).unwrap_err();
        assert_eq!(err.code(), Some(-1001));
    }

    #[test]
    fn test_trim_cl_string() {
        assert_eq!(trim_cl_string("NVIDIA CUDA\0"), "NVIDIA CUDA");
        assert_eq!(trim_cl_string("  gfx1030 \0\0"), "gfx1030");
    }

    #[test]
    fn test_null_device() {
        assert!(null_device().is_null());
        let catalog = FixedCatalog::new(vec![("P", vec![("dev", DeviceClass::Gpu)])]);
        let platforms = catalog.platforms().unwrap();
        let dev = select_device(&catalog, &platforms, DeviceClass::Gpu, "")
            .unwrap()
            .unwrap();
        assert!(!dev.is_null());
    }

    #[test]
    fn test_device_class_parsing() {
        assert_eq!("gpu".parse::<DeviceClass>().unwrap(), DeviceClass::Gpu);
        assert_eq!("CPU".parse::<DeviceClass>().unwrap(), DeviceClass::Cpu);
        assert!("fpga".parse::<DeviceClass>().is_err());
        assert_eq!(DeviceClass::Cpu.to_string(), "cpu");
    }
}
