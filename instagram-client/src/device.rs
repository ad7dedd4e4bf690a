use serde::{Deserialize, Serialize};

/// Android device identity presented to the private API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub app_version: String,
    pub android_version: u32,
    pub android_release: String,
    pub dpi: String,
    pub resolution: String,
    pub manufacturer: String,
    pub device: String,
    pub model: String,
    pub cpu: String,
    pub version_code: String,
    pub locale: String,
}

struct DeviceSpec {
    app_version: &'static str,
    android_version: u32,
    android_release: &'static str,
    dpi: &'static str,
    resolution: &'static str,
    manufacturer: &'static str,
    device: &'static str,
    model: &'static str,
    cpu: &'static str,
    version_code: &'static str,
    locale: &'static str,
}

const DEVICE_POOL: [DeviceSpec; 4] = [
    DeviceSpec {
        app_version: "290.0.0.28.109",
        android_version: 30,
        android_release: "11",
        dpi: "420dpi",
        resolution: "1080x2136",
        manufacturer: "samsung",
        device: "y2q",
        model: "SM-G9810",
        cpu: "qcom",
        version_code: "465350279",
        locale: "zh_TW",
    },
    DeviceSpec {
        app_version: "286.0.0.15.69",
        android_version: 30,
        android_release: "11",
        dpi: "480dpi",
        resolution: "1080x2400",
        manufacturer: "Xiaomi",
        device: "umi",
        model: "Mi 10",
        cpu: "qcom",
        version_code: "398737262",
        locale: "zh_CN",
    },
    DeviceSpec {
        app_version: "275.0.0.27.100",
        android_version: 29,
        android_release: "10",
        dpi: "440dpi",
        resolution: "1080x2340",
        manufacturer: "HUAWEI",
        device: "HWEL29",
        model: "ELE-L29",
        cpu: "kirin980",
        version_code: "285739473",
        locale: "zh_CN",
    },
    DeviceSpec {
        app_version: "253.0.0.16.119",
        android_version: 30,
        android_release: "10",
        dpi: "420dpi",
        resolution: "1080x2220",
        manufacturer: "samsung",
        device: "starlte",
        model: "SM-G960F",
        cpu: "exynos9810",
        version_code: "215757342",
        locale: "zh_TW",
    },
];

impl DeviceSpec {
    fn to_profile(&self) -> DeviceProfile {
        DeviceProfile {
            app_version: self.app_version.to_string(),
            android_version: self.android_version,
            android_release: self.android_release.to_string(),
            dpi: self.dpi.to_string(),
            resolution: self.resolution.to_string(),
            manufacturer: self.manufacturer.to_string(),
            device: self.device.to_string(),
            model: self.model.to_string(),
            cpu: self.cpu.to_string(),
            version_code: self.version_code.to_string(),
            locale: self.locale.to_string(),
        }
    }
}

impl DeviceProfile {
    /// Picks one profile from the built-in pool at random.
    pub fn random() -> Self {
        DEVICE_POOL[fastrand::usize(..DEVICE_POOL.len())].to_profile()
    }

    pub fn pool() -> Vec<DeviceProfile> {
        DEVICE_POOL.iter().map(DeviceSpec::to_profile).collect()
    }

    pub fn user_agent(&self) -> String {
        format!(
            "Instagram {} Android ({}/{}; {}; {}; {}; {}; {}; {}; {}; {})",
            self.app_version,
            self.android_version,
            self.android_release,
            self.dpi,
            self.resolution,
            self.manufacturer,
            self.model,
            self.device,
            self.cpu,
            self.locale,
            self.version_code
        )
    }
}
