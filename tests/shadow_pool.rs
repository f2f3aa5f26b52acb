use wgpu_deferred::renderer::device::HeadlessDevice;
use wgpu_deferred::renderer::shadow_map::ShadowMapTexturePool;
use wgpu_deferred::RenderError;

fn ready_pool(device: &mut HeadlessDevice, size: u32) -> ShadowMapTexturePool {
    let mut pool = ShadowMapTexturePool::new(128, size);
    pool.create_device_dependent_resources(device).unwrap();
    pool
}

#[test]
fn borrowing_past_the_array_size_fails() {
    let mut device = HeadlessDevice::new();
    let mut pool = ready_pool(&mut device, 4);

    let slices: Vec<_> = (0..4).map(|_| pool.borrow_texture().unwrap()).collect();
    let mut layers: Vec<u32> = slices.iter().map(|slice| slice.array_index()).collect();
    layers.sort_unstable();
    assert_eq!(layers, vec![0, 1, 2, 3]);
    assert_eq!(pool.free_count(), 0);
    assert!(matches!(pool.borrow_texture(), Err(RenderError::PoolExhausted)));

    for slice in slices {
        pool.return_texture(slice).unwrap();
    }
    assert_eq!(pool.free_count(), 4);
    assert!(pool.borrow_texture().is_ok());
}

#[test]
fn slices_only_return_to_their_own_pool() {
    let mut device = HeadlessDevice::new();
    let mut first = ready_pool(&mut device, 2);
    let mut second = ready_pool(&mut device, 2);

    let slice = first.borrow_texture().unwrap();
    assert_eq!(second.return_texture(slice), Err(RenderError::ForeignShadowMap));
    assert_eq!(second.free_count(), 2);
    assert_eq!(first.outstanding(), 1);
}

#[test]
fn destroy_waits_for_every_slice() {
    let mut device = HeadlessDevice::new();
    let mut pool = ready_pool(&mut device, 3);
    let first = pool.borrow_texture().unwrap();
    let second = pool.borrow_texture().unwrap();

    assert_eq!(
        pool.destroy_device_dependent_resources(&mut device),
        Err(RenderError::OutstandingShadowMaps { outstanding: 2 })
    );

    pool.return_texture(first).unwrap();
    pool.return_texture(second).unwrap();
    pool.destroy_device_dependent_resources(&mut device).unwrap();
    assert_eq!(device.live_texture_count(), 0);
    assert!(matches!(pool.borrow_texture(), Err(RenderError::DeviceUnavailable(_))));
}
