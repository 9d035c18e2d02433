#[cfg(feature = "backend_hostapd")]
pub mod hostapd;

#[cfg(feature = "backend_wpa_dbus")]
pub mod wpa_dbus;

#[cfg(any(test, feature = "backend_mock"))]
pub mod mock;
