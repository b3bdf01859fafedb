use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;

/// Select the device to run a model on.
///
/// CUDA and Metal devices are used when the crate is compiled with
/// support for them and a device is available. Otherwise, or when `cpu`
/// is set, the CPU is used.
pub fn select_device(cpu: bool) -> Result<Device, candle_core::Error> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Device::new_cuda(0)
    } else if metal_is_available() {
        Device::new_metal(0)
    } else {
        Ok(Device::Cpu)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use candle_core::Device;

    use super::select_device;

    /// Get devices to test on.
    pub fn test_devices() -> Vec<Device> {
        let mut devices = vec![Device::Cpu];

        if let Ok(device) = Device::new_cuda(0) {
            devices.push(device);
        }

        if let Ok(device) = Device::new_metal(0) {
            devices.push(device);
        }

        devices
    }

    #[test]
    fn select_device_honors_cpu_flag() {
        assert!(matches!(select_device(true), Ok(Device::Cpu)));
    }
}
