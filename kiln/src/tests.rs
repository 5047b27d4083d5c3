// Copyright (c) 2026 The kiln developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

#![cfg(test)]

/// Creates a headless device. Returns the backend, to inspect what was recorded and submitted,
/// and the `Device` wrapping it.
macro_rules! headless_device {
    () => {{
        let headless = std::sync::Arc::new($crate::device::headless::HeadlessDevice::new(
            Default::default(),
        ));
        let device = $crate::device::Device::new(headless.clone());

        (headless, device)
    }};
}

/// Creates a headless device and a command queue on it.
macro_rules! headless_queue {
    () => {{
        let (headless, device) = headless_device!();
        let queue =
            $crate::queue::CommandQueue::new(device.clone(), Default::default()).unwrap();

        (headless, device, queue)
    }};
}

/// Creates an auto-controlled color image on a headless device.
macro_rules! test_image {
    ($headless:expr, $device:expr) => {
        test_image!($headless, $device, ash::vk::ImageLayout::UNDEFINED)
    };
    ($headless:expr, $device:expr, $initial_layout:expr) => {{
        let handle = $headless.next_handle::<ash::vk::Image>();

        // SAFETY: Headless handles are never dereferenced.
        unsafe {
            $crate::image::Image::from_handle(
                $device.clone(),
                handle,
                $crate::image::ImageCreateInfo {
                    format: ash::vk::Format::R8G8B8A8_UNORM,
                    extent: [64, 64, 1],
                    initial_layout: $initial_layout,
                    ..Default::default()
                },
            )
        }
    }};
}

macro_rules! assert_should_panic {
    ($msg:expr, $code:block) => {{
        let res = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $code));

        match res {
            Ok(_) => panic!("Test expected to panic but didn't"),
            Err(err) => {
                if let Some(msg) = err.downcast_ref::<String>() {
                    assert!(msg.contains($msg));
                } else if let Some(&msg) = err.downcast_ref::<&str>() {
                    assert!(msg.contains($msg));
                } else {
                    panic!("Couldn't decipher the panic message of the test")
                }
            }
        }
    }};

    ($code:block) => {{
        let res = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $code));

        match res {
            Ok(_) => panic!("Test expected to panic but didn't"),
            Err(_) => {}
        }
    }};
}
